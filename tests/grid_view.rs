use serde_json::json;

mod test_support;

use test_support::{cell_params, error_code, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn grid_renders_each_cell_once_with_covered_periods() {
    let workspace = temp_dir("timetabled-grid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let table_id = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "tables.create",
        json!({ "name": "Room 1" }),
    )["table"]["id"]
        .as_i64()
        .expect("table id");

    let long = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "cells.create",
        cell_params(table_id, 1, "09:00", "10:30"),
    )["cell"]["id"]
        .as_i64()
        .expect("long");
    let short = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "cells.create",
        cell_params(table_id, 1, "10:30", "11:00"),
    )["cell"]["id"]
        .as_i64()
        .expect("short");
    let group = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "groups.create",
        json!({ "name": "G", "subjectId": 10, "teacherId": 7, "educationLevel": "B" }),
    )["group"]["id"]
        .as_i64()
        .expect("group");
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "links.set",
        json!({ "cellId": long, "groupIds": [group] }),
    );

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "grid.view",
        json!({ "tableId": table_id, "day": 1 }),
    );
    assert_eq!(view["periodCount"], 30);
    let days = view["days"].as_array().expect("days");
    assert_eq!(days.len(), 1);
    let day = &days[0];
    assert_eq!(day["dayOfWeek"], 1);
    assert_eq!(day["label"], "sunday");
    assert_eq!(day["cellCount"], 2);
    assert_eq!(day["freePeriods"], 26);

    let slots = day["slots"].as_array().expect("slots");
    assert_eq!(slots.len(), 30);
    assert_eq!(slots[1], json!({ "kind": "empty", "period": 2 }));
    assert_eq!(
        slots[2],
        json!({ "kind": "start", "period": 3, "cellId": long, "span": 3, "linkedGroupCount": 1 })
    );
    assert_eq!(slots[3], json!({ "kind": "covered", "period": 4, "cellId": long }));
    // Period 5 is covered by the span that started at 3.
    assert_eq!(slots[4], json!({ "kind": "covered", "period": 5, "cellId": long }));
    assert_eq!(
        slots[5],
        json!({ "kind": "start", "period": 6, "cellId": short, "span": 1, "linkedGroupCount": 0 })
    );
    assert_eq!(slots[6]["kind"], "empty");

    let starts = slots.iter().filter(|s| s["kind"] == "start").count();
    assert_eq!(starts, 2);

    let week = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grid.view",
        json!({ "tableId": table_id }),
    );
    let days = week["days"].as_array().expect("days");
    assert_eq!(days.len(), 7);
    assert_eq!(days[0]["label"], "saturday");
    assert_eq!(days[0]["freePeriods"], 30);

    let e = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "grid.view",
        json!({ "tableId": table_id, "day": 7 }),
    );
    assert_eq!(error_code(&e), "bad_params");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "grid.view",
        json!({ "tableId": table_id + 1 }),
    );
    assert_eq!(error_code(&e), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn slots_list_reports_catalog_and_week() {
    let workspace = temp_dir("timetabled-slots");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let slots = request_ok(&mut stdin, &mut reader, "2", "slots.list", json!({}));
    assert_eq!(slots["slotMinutes"], 30);
    assert_eq!(slots["periodCount"], 30);
    assert_eq!(slots["offGridPolicy"], "reject");
    let list = slots["slots"].as_array().expect("slots");
    assert_eq!(list.first(), Some(&json!({ "period": 1, "time": "08:00" })));
    assert_eq!(list.last(), Some(&json!({ "period": 30, "time": "22:30" })));
    let days: Vec<&str> = slots["days"]
        .as_array()
        .expect("days")
        .iter()
        .filter_map(|d| d["label"].as_str())
        .collect();
    assert_eq!(
        days,
        vec!["saturday", "sunday", "monday", "tuesday", "wednesday", "thursday", "friday"]
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
