use crate::ipc::error::{ok, store_err};
use crate::ipc::helpers::{optional_str, patch_object, require_db, required_str, search_param};
use crate::ipc::types::{AppState, Request};
use crate::store::{Repository, SqliteStore, Subject, SubjectDraft, SubjectPatch};
use serde_json::json;

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "subjects": [] }));
    };
    let subjects = match Repository::<Subject>::list(&SqliteStore::new(conn)) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };
    let subjects: Vec<Subject> = match search_param(req) {
        Some(needle) => subjects.into_iter().filter(|s| s.matches(&needle)).collect(),
        None => subjects,
    };
    ok(&req.id, json!({ "subjects": subjects }))
}

fn handle_subjects_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match Repository::<Subject>::get(&SqliteStore::new(conn), &subject_id) {
        Ok(subject) => ok(&req.id, json!({ "subject": subject })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let subject_code = match required_str(req, "subjectCode") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_name = match required_str(req, "subjectName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let instructor = match required_str(req, "instructor") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let draft = SubjectDraft {
        subject_code,
        subject_name,
        instructor,
    };
    match Repository::<Subject>::create(&SqliteStore::new(conn), &draft) {
        Ok(subject) => {
            tracing::info!(subject_id = %subject.id, "subject created");
            ok(&req.id, json!({ "subjectId": subject.id, "subject": subject }))
        }
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = patch_object(req) {
        return resp;
    }
    let patch_value = &req.params["patch"];
    let patch = SubjectPatch {
        subject_code: optional_str(patch_value, "subjectCode"),
        subject_name: optional_str(patch_value, "subjectName"),
        instructor: optional_str(patch_value, "instructor"),
    };

    match Repository::<Subject>::update(&SqliteStore::new(conn), &subject_id, &patch) {
        Ok(subject) => ok(&req.id, json!({ "subject": subject })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match Repository::<Subject>::delete(&SqliteStore::new(conn), &subject_id) {
        Ok(()) => {
            tracing::info!(subject_id = %subject_id, "subject deleted");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.get" => Some(handle_subjects_get(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
