use crate::ipc::error::{err, ok, store_err};
use crate::ipc::helpers::{
    optional_str, parse_year_level, patch_object, require_db, required_str, search_param,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{Repository, SqliteStore, Student, StudentDraft, StudentPatch, MIN_YEAR_LEVEL};
use serde_json::json;

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    let students = match Repository::<Student>::list(&SqliteStore::new(conn)) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };
    let students: Vec<Student> = match search_param(req) {
        Some(needle) => students.into_iter().filter(|s| s.matches(&needle)).collect(),
        None => students,
    };
    ok(&req.id, json!({ "students": students }))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match Repository::<Student>::get(&SqliteStore::new(conn), &student_id) {
        Ok(student) => ok(&req.id, json!({ "student": student })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let student_number = match required_str(req, "studentNumber") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course = match required_str(req, "course") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let year_level = match req.params.get("yearLevel") {
        None | Some(serde_json::Value::Null) => MIN_YEAR_LEVEL,
        Some(v) => match parse_year_level(v) {
            Some(y) => y,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "yearLevel must be an integer",
                    Some(json!({ "yearLevel": v })),
                )
            }
        },
    };

    let draft = StudentDraft {
        student_number,
        first_name,
        last_name,
        course,
        year_level,
    };
    match Repository::<Student>::create(&SqliteStore::new(conn), &draft) {
        Ok(student) => {
            tracing::info!(student_id = %student.id, "student created");
            ok(&req.id, json!({ "studentId": student.id, "student": student }))
        }
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let patch_obj = match patch_object(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let patch_value = &req.params["patch"];

    let year_level = match patch_obj.get("yearLevel") {
        None => None,
        Some(v) => match parse_year_level(v) {
            Some(y) => Some(y),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "yearLevel must be an integer",
                    Some(json!({ "yearLevel": v })),
                )
            }
        },
    };
    let patch = StudentPatch {
        student_number: optional_str(patch_value, "studentNumber"),
        first_name: optional_str(patch_value, "firstName"),
        last_name: optional_str(patch_value, "lastName"),
        course: optional_str(patch_value, "course"),
        year_level,
    };

    match Repository::<Student>::update(&SqliteStore::new(conn), &student_id, &patch) {
        Ok(student) => ok(&req.id, json!({ "student": student })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    // Grades pointing at this student are left alone.
    match Repository::<Student>::delete(&SqliteStore::new(conn), &student_id) {
        Ok(()) => {
            tracing::info!(student_id = %student_id, "student deleted");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
