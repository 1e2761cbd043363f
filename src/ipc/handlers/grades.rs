use crate::calc::{self, component_from_json, ComponentScores};
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::helpers::{optional_str, patch_object, require_db, required_str, search_param};
use crate::ipc::types::{AppState, Request};
use crate::store::{Grade, GradeDraft, GradePatch, GradeView, Repository, SqliteStore};
use serde_json::json;
use std::path::PathBuf;

const CSV_HEADER: &str = "student_number,student_name,subject_code,subject_name,prelim,midterm,semifinal,final,final_grade,tier\n";

fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn csv_score(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_default()
}

fn grade_view_csv_line(v: &GradeView) -> String {
    let s = &v.grade.scores;
    format!(
        "{},{},{},{},{},{},{},{},{:.1},{}\n",
        csv_quote(v.student_number.as_deref().unwrap_or("")),
        csv_quote(&v.student_name),
        csv_quote(&v.subject_code),
        csv_quote(&v.subject_name),
        csv_score(s.prelim),
        csv_score(s.midterm),
        csv_score(s.semifinal),
        csv_score(s.final_),
        v.result.final_grade,
        v.result.tier
    )
}

/// Component keys present in `obj` become `Some(..)`; an explicit null or
/// unparseable value clears the component.
fn component_patch(obj: &serde_json::Value, key: &str) -> Option<Option<f64>> {
    obj.get(key).map(component_from_json)
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "grades": [] }));
    };
    let search = search_param(req);
    match SqliteStore::new(conn).list_grade_views(search.as_deref()) {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_grades_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match SqliteStore::new(conn).get_grade_view(&grade_id) {
        Ok(grade) => ok(&req.id, json!({ "grade": grade })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_grades_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let draft = GradeDraft {
        student_id,
        subject_id,
        scores: ComponentScores::from_json(&req.params),
    };
    let store = SqliteStore::new(conn);
    let created = match Repository::<Grade>::create(&store, &draft) {
        Ok(g) => g,
        Err(e) => return store_err(&req.id, &e),
    };
    tracing::info!(grade_id = %created.id, "grade created");
    match store.get_grade_view(&created.id) {
        Ok(view) => ok(&req.id, json!({ "gradeId": created.id, "grade": view })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_grades_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if let Err(resp) = patch_object(req) {
        return resp;
    }
    let patch_value = &req.params["patch"];
    let patch = GradePatch {
        student_id: optional_str(patch_value, "studentId"),
        subject_id: optional_str(patch_value, "subjectId"),
        prelim: component_patch(patch_value, "prelim"),
        midterm: component_patch(patch_value, "midterm"),
        semifinal: component_patch(patch_value, "semifinal"),
        final_: component_patch(patch_value, "final"),
    };

    let store = SqliteStore::new(conn);
    if let Err(e) = Repository::<Grade>::update(&store, &grade_id, &patch) {
        return store_err(&req.id, &e);
    }
    match store.get_grade_view(&grade_id) {
        Ok(view) => ok(&req.id, json!({ "grade": view })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let grade_id = match required_str(req, "gradeId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match Repository::<Grade>::delete(&SqliteStore::new(conn), &grade_id) {
        Ok(()) => {
            tracing::info!(grade_id = %grade_id, "grade deleted");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => store_err(&req.id, &e),
    }
}

/// Live preview while a grade form is being edited; needs no workspace.
fn handle_grades_compute(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let scores = ComponentScores::from_json(&req.params);
    let result = calc::compute(&scores);
    ok(&req.id, json!(result))
}

fn handle_grades_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let out_path = match req.params.get("outPath").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing outPath", None),
    };
    let search = search_param(req);

    let views = match SqliteStore::new(conn).list_grade_views(search.as_deref()) {
        Ok(v) => v,
        Err(e) => return store_err(&req.id, &e),
    };

    let mut csv = String::from(CSV_HEADER);
    for v in &views {
        csv.push_str(&grade_view_csv_line(v));
    }

    let out = PathBuf::from(&out_path);
    if let Some(parent) = out.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": out_path })),
            );
        }
    }
    if let Err(e) = std::fs::write(&out, csv) {
        return err(
            &req.id,
            "io_failed",
            e.to_string(),
            Some(json!({ "path": out_path })),
        );
    }

    tracing::info!(path = %out_path, rows = views.len(), "grade report exported");
    ok(
        &req.id,
        json!({ "ok": true, "rowsExported": views.len(), "path": out_path }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.get" => Some(handle_grades_get(state, req)),
        "grades.create" => Some(handle_grades_create(state, req)),
        "grades.update" => Some(handle_grades_update(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        "grades.compute" => Some(handle_grades_compute(state, req)),
        "grades.exportCsv" => Some(handle_grades_export_csv(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::compute;

    fn view(student: Option<(&str, &str, &str)>, subject: Option<(&str, &str)>) -> GradeView {
        let grade = Grade {
            id: "g1".to_string(),
            student_id: "s1".to_string(),
            subject_id: "sub1".to_string(),
            scores: ComponentScores::new(Some(90.0), Some(90.0), Some(90.0), None),
            created_at: "2024-06-01T00:00:00.000Z".to_string(),
            updated_at: "2024-06-01T00:00:00.000Z".to_string(),
        };
        GradeView::new(
            grade,
            student.map(|(f, l, n)| (f.to_string(), l.to_string(), n.to_string())),
            subject.map(|(c, n)| (c.to_string(), n.to_string())),
        )
    }

    #[test]
    fn csv_quote_escapes_only_when_needed() {
        assert_eq!(csv_quote("plain"), "plain");
        assert_eq!(csv_quote("Cruz, Ben"), "\"Cruz, Ben\"");
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn csv_line_leaves_missing_components_blank() {
        let v = view(Some(("Ana", "Santos", "2024-0001")), Some(("CS101", "Intro, Part 1")));
        assert_eq!(
            grade_view_csv_line(&v),
            "2024-0001,Ana Santos,CS101,\"Intro, Part 1\",90,90,90,,54.0,failing\n"
        );
    }

    #[test]
    fn csv_line_for_orphaned_grade_uses_unknown_labels() {
        let v = view(None, None);
        let line = grade_view_csv_line(&v);
        assert!(line.starts_with(",Unknown,Unknown,Unknown,"));
        assert_eq!(v.result, compute(&v.grade.scores));
    }

    #[test]
    fn component_patch_distinguishes_absent_from_cleared() {
        let obj = json!({ "prelim": null, "midterm": "88.5", "final": "n/a" });
        assert_eq!(component_patch(&obj, "prelim"), Some(None));
        assert_eq!(component_patch(&obj, "midterm"), Some(Some(88.5)));
        assert_eq!(component_patch(&obj, "semifinal"), None);
        assert_eq!(component_patch(&obj, "final"), Some(None));
    }
}
