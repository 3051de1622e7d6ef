mod test_support;

use serde_json::json;
use test_support::{error_code, request_err, request_ok, spawn_sidecar, str_field, temp_dir};

#[test]
fn schedule_save_supersedes_and_keeps_history() {
    let workspace = temp_dir("planbook-schedule");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = str_field(
        &request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "Grade 4" })),
        "classId",
    );
    let math_id = str_field(
        &request_ok(&mut stdin, &mut reader, "3", "subjects.create", json!({ "name": "Math" })),
        "subjectId",
    );
    let art_id = str_field(
        &request_ok(&mut stdin, &mut reader, "4", "subjects.create", json!({ "name": "Art" })),
        "subjectId",
    );

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.get",
        json!({ "classId": class_id }),
    );
    assert!(empty.get("scheduleId").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(empty.get("days").and_then(|d| d.get("1")), Some(&json!([])));

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.save",
        json!({ "classId": class_id, "days": { "1": [art_id] } }),
    );
    assert_eq!(first.get("name").and_then(|v| v.as_str()), Some("Grade 4 Schedule"));
    let first_id = str_field(&first, "scheduleId");

    // Duplicates within a day collapse onto the first position.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.save",
        json!({
            "classId": class_id,
            "days": { "1": [math_id, art_id, math_id], "3": [art_id] }
        }),
    );
    let second_id = str_field(&second, "scheduleId");
    assert_ne!(first_id, second_id);
    assert_eq!(second.get("entryCount").and_then(|v| v.as_u64()), Some(3));

    let active = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "schedule.get",
        json!({ "classId": class_id }),
    );
    assert_eq!(active.get("scheduleId").and_then(|v| v.as_str()), Some(second_id.as_str()));
    let days = active.get("days").cloned().unwrap_or_default();
    assert_eq!(days.get("1"), Some(&json!([math_id, art_id])));
    assert_eq!(days.get("3"), Some(&json!([art_id])));
    assert_eq!(days.get("0"), Some(&json!([])));

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "schedule.history",
        json!({ "classId": class_id }),
    );
    let schedules = history
        .get("schedules")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(schedules.len(), 2);
    assert_eq!(schedules[0].get("scheduleId").and_then(|v| v.as_str()), Some(second_id.as_str()));
    assert_eq!(schedules[0].get("isActive").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(schedules[0].get("itemCount").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(schedules[1].get("isActive").and_then(|v| v.as_bool()), Some(false));

    let classes = request_ok(&mut stdin, &mut reader, "10", "classes.list", json!({}));
    let listed = classes.get("classes").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    assert_eq!(listed[0].get("hasActiveSchedule").and_then(|v| v.as_bool()), Some(true));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "schedule.delete",
        json!({ "scheduleId": first_id }),
    );
    let history = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "schedule.history",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        history.get("schedules").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
}

#[test]
fn schedule_save_validates_days_and_subjects() {
    let workspace = temp_dir("planbook-schedule-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = str_field(
        &request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "Grade 5" })),
        "classId",
    );
    let math_id = str_field(
        &request_ok(&mut stdin, &mut reader, "3", "subjects.create", json!({ "name": "Math" })),
        "subjectId",
    );

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.save",
        json!({ "classId": class_id, "days": { "7": [math_id] } }),
    );
    assert_eq!(error_code(&e), "invalid_input");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "schedule.save",
        json!({ "classId": class_id, "days": { "monday": [math_id] } }),
    );
    assert_eq!(error_code(&e), "invalid_input");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "schedule.save",
        json!({ "classId": class_id, "days": { "2": ["no-such-subject"] } }),
    );
    assert_eq!(error_code(&e), "not_found");

    let e = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "schedule.save",
        json!({ "classId": "no-such-class", "days": {} }),
    );
    assert_eq!(error_code(&e), "not_found");

    // Unstaffed subjects are accepted until the setup flag says otherwise.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "schedule.save",
        json!({ "classId": class_id, "days": { "2": [math_id] } }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "setup.update",
        json!({ "section": "schedule", "patch": { "rejectUnstaffedSubjects": true } }),
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "schedule.save",
        json!({ "classId": class_id, "days": { "2": [math_id] } }),
    );
    assert_eq!(error_code(&e), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "teachers.create",
        json!({ "username": "m", "name": "M", "classIds": [class_id], "subjectIds": [math_id] }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "schedule.save",
        json!({ "classId": class_id, "days": { "2": [math_id] } }),
    );

    // Failed saves never disturb the active schedule.
    let history = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "schedule.history",
        json!({ "classId": class_id }),
    );
    let schedules = history
        .get("schedules")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(schedules.len(), 2);
    let active = schedules
        .iter()
        .filter(|s| s.get("isActive").and_then(|v| v.as_bool()) == Some(true))
        .count();
    assert_eq!(active, 1);
}

#[test]
fn subject_delete_is_refused_while_schedules_list_it() {
    let workspace = temp_dir("planbook-subject-in-use");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = str_field(
        &request_ok(&mut stdin, &mut reader, "2", "classes.create", json!({ "name": "Grade 4" })),
        "classId",
    );
    let math_id = str_field(
        &request_ok(&mut stdin, &mut reader, "3", "subjects.create", json!({ "name": "Math" })),
        "subjectId",
    );
    let art_id = str_field(
        &request_ok(&mut stdin, &mut reader, "4", "subjects.create", json!({ "name": "Art" })),
        "subjectId",
    );
    let first_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "5",
            "schedule.save",
            json!({ "classId": class_id, "days": { "1": [math_id, art_id], "2": [art_id] } }),
        ),
        "scheduleId",
    );
    let second_id = str_field(
        &request_ok(
            &mut stdin,
            &mut reader,
            "6",
            "schedule.save",
            json!({ "classId": class_id, "days": { "1": [math_id] } }),
        ),
        "scheduleId",
    );

    // Art only survives in the superseded schedule.
    let e = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "subjects.delete",
        json!({ "subjectId": art_id }),
    );
    assert_eq!(error_code(&e), "conflict");
    let details = e.get("details").cloned().unwrap_or_default();
    assert_eq!(details.get("activeSchedules").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(details.get("supersededSchedules").and_then(|v| v.as_i64()), Some(1));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "subjects.delete",
        json!({ "subjectId": math_id }),
    );
    assert_eq!(error_code(&e), "conflict");
    let details = e.get("details").cloned().unwrap_or_default();
    assert_eq!(details.get("activeSchedules").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(details.get("supersededSchedules").and_then(|v| v.as_i64()), Some(1));

    // History is untouched by the refused deletes.
    let history = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "schedule.history",
        json!({ "classId": class_id }),
    );
    let item_counts: Vec<(String, i64)> = history
        .get("schedules")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .map(|s| {
                    (
                        s.get("scheduleId").and_then(|v| v.as_str()).unwrap_or("").to_string(),
                        s.get("itemCount").and_then(|v| v.as_i64()).unwrap_or(-1),
                    )
                })
                .collect()
        })
        .unwrap_or_default();
    assert!(item_counts.contains(&(first_id.clone(), 3)));
    assert!(item_counts.contains(&(second_id.clone(), 1)));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "schedule.delete",
        json!({ "scheduleId": first_id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "subjects.delete",
        json!({ "subjectId": art_id }),
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "12",
        "subjects.delete",
        json!({ "subjectId": math_id }),
    );
    assert_eq!(error_code(&e), "conflict");

    let active = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "schedule.get",
        json!({ "classId": class_id }),
    );
    assert_eq!(active.get("scheduleId").and_then(|v| v.as_str()), Some(second_id.as_str()));
    assert_eq!(active.get("days").and_then(|d| d.get("1")), Some(&json!([math_id])));
}
