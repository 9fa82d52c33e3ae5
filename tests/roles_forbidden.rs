use serde_json::json;

mod test_support;

use test_support::{cell_params, error_code, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn viewer_can_read_but_not_mutate() {
    let workspace = temp_dir("timetabled-roles");
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
    let cell_id = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "cells.create",
        cell_params(table_id, 1, "09:00", "10:30"),
    )["cell"]["id"]
        .as_i64()
        .expect("cell id");

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "role": "viewer" }),
    );
    assert_eq!(selected["role"], "viewer");

    let mutations = [
        ("tables.create", json!({ "name": "Room 2" })),
        ("tables.update", json!({ "tableId": table_id, "patch": { "name": "X" } })),
        ("tables.delete", json!({ "tableId": table_id })),
        ("cells.create", cell_params(table_id, 2, "09:00", "10:00")),
        ("cells.update", json!({ "cellId": cell_id, "endTime": "11:00" })),
        ("cells.delete", json!({ "cellId": cell_id })),
        ("groups.create", json!({ "name": "G", "subjectId": 10, "teacherId": 7, "educationLevel": "B" })),
        ("groups.delete", json!({ "groupId": 1 })),
        ("links.set", json!({ "cellId": cell_id, "groupIds": [] })),
        ("setup.update", json!({ "section": "linking", "patch": { "enforceCompatibility": false } })),
    ];
    for (i, (method, params)) in mutations.into_iter().enumerate() {
        let e = request_err(&mut stdin, &mut reader, &format!("m{}", i), method, params);
        assert_eq!(error_code(&e), "forbidden", "{}", method);
    }

    let cells = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "cells.list",
        json!({ "tableId": table_id }),
    );
    assert_eq!(cells["cells"].as_array().map(|a| a.len()), Some(1));
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grid.view",
        json!({ "tableId": table_id }),
    );
    request_ok(&mut stdin, &mut reader, "7", "setup.get", json!({}));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "role": "owner" }),
    );
    assert_eq!(error_code(&e), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
