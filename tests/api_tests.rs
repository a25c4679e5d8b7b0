//! API integration tests
//!
//! Run against a live instance with a clean database:
//! `cargo test -- --ignored`

use reqwest::Client;
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

const BASE_URL: &str = "http://localhost:8080/api/v1";

/// Server/item IDs unique enough for repeated runs against the same
/// database
fn unique_id() -> i32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Clock before epoch")
        .subsec_nanos();
    100_000 + (nanos % 100_000_000) as i32
}

async fn create_defect(client: &Client, server_id: i32) -> Value {
    let response = client
        .post(format!("{}/defects", BASE_URL))
        .json(&json!({
            "server_id": server_id,
            "problem_description": "Server does not pass POST",
            "actor_id": 1
        }))
        .send()
        .await
        .expect("Failed to send create request");

    assert_eq!(response.status(), 201);
    response.json().await.expect("Failed to parse create response")
}

async fn transition(client: &Client, id: i64, path: &str, body: Value) -> reqwest::Response {
    client
        .post(format!("{}/defects/{}/{}", BASE_URL, id, path))
        .json(&body)
        .send()
        .await
        .expect("Failed to send transition request")
}

/// Drive a fresh record to REPAIRING via diagnosis and a reservation
async fn defect_in_repair(client: &Client, server_id: i32, part_type: &str) -> i64 {
    let record = create_defect(client, server_id).await;
    let id = record["id"].as_i64().expect("No id in response");

    let response = transition(client, id, "start-diagnosis", json!({"actor_id": 1})).await;
    assert_eq!(response.status(), 200);

    let response = transition(
        client,
        id,
        "complete-diagnosis",
        json!({
            "actor_id": 1,
            "repair_part_type": part_type,
            "diagnosis_result": "Component failure confirmed"
        }),
    )
    .await;
    assert_eq!(response.status(), 200);

    let response = transition(
        client,
        id,
        "reserve",
        json!({"actor_id": 1, "inventory_item_id": unique_id()}),
    )
    .await;
    assert_eq!(response.status(), 200);

    let response = transition(client, id, "start-repair", json!({"actor_id": 1})).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "REPAIRING");

    id
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_create_requires_problem_description() {
    let client = Client::new();

    let response = client
        .post(format!("{}/defects", BASE_URL))
        .json(&json!({
            "server_id": unique_id(),
            "problem_description": ""
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 400);
}

#[tokio::test]
#[ignore]
async fn test_one_open_defect_per_server() {
    let client = Client::new();
    let server_id = unique_id();

    create_defect(&client, server_id).await;

    let response = client
        .post(format!("{}/defects", BASE_URL))
        .json(&json!({
            "server_id": server_id,
            "problem_description": "Second fault report"
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 409);
}

// Scenario A: diagnosis with no reservation routes to WAITING_PARTS
#[tokio::test]
#[ignore]
async fn test_diagnosis_routes_to_waiting_parts() {
    let client = Client::new();
    let record = create_defect(&client, unique_id()).await;
    let id = record["id"].as_i64().expect("No id");
    assert_eq!(record["status"], "NEW");

    let response = transition(&client, id, "start-diagnosis", json!({"actor_id": 7})).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "DIAGNOSING");
    assert_eq!(body["diagnostician_id"], 7);

    let response = transition(
        &client,
        id,
        "complete-diagnosis",
        json!({
            "actor_id": 7,
            "repair_part_type": "PSU",
            "diagnosis_result": "PSU dead, needs replacement"
        }),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "WAITING_PARTS");
    assert_eq!(body["repair_part_type"], "PSU");
}

#[tokio::test]
#[ignore]
async fn test_illegal_transition_rejected() {
    let client = Client::new();
    let record = create_defect(&client, unique_id()).await;
    let id = record["id"].as_i64().expect("No id");

    // resolve is not legal from NEW
    let response = transition(
        &client,
        id,
        "resolve",
        json!({"actor_id": 1, "resolution": "nothing to do"}),
    )
    .await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error"], "InvalidTransition");
}

#[tokio::test]
#[ignore]
async fn test_start_repair_requires_reservation() {
    let client = Client::new();
    let record = create_defect(&client, unique_id()).await;
    let id = record["id"].as_i64().expect("No id");

    transition(&client, id, "start-diagnosis", json!({"actor_id": 1})).await;
    transition(
        &client,
        id,
        "complete-diagnosis",
        json!({"actor_id": 1, "repair_part_type": "RAM", "diagnosis_result": "DIMM failure"}),
    )
    .await;

    // WAITING_PARTS without a reservation
    let response = transition(&client, id, "start-repair", json!({"actor_id": 1})).await;
    assert_eq!(response.status(), 409);
}

// Scenario B: reservation exclusivity
#[tokio::test]
#[ignore]
async fn test_reservation_exclusivity() {
    let client = Client::new();
    let item_id = unique_id();

    let first = create_defect(&client, unique_id()).await;
    let first_id = first["id"].as_i64().expect("No id");
    transition(&client, first_id, "start-diagnosis", json!({"actor_id": 1})).await;
    transition(
        &client,
        first_id,
        "complete-diagnosis",
        json!({"actor_id": 1, "repair_part_type": "SSD", "diagnosis_result": "Drive failure"}),
    )
    .await;

    let response = transition(
        &client,
        first_id,
        "reserve",
        json!({"actor_id": 1, "inventory_item_id": item_id}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(
        body["active_reservation"]["inventory_item_id"],
        item_id
    );

    // A second record cannot reserve the same unit
    let second = create_defect(&client, unique_id()).await;
    let second_id = second["id"].as_i64().expect("No id");
    transition(&client, second_id, "start-diagnosis", json!({"actor_id": 1})).await;
    transition(
        &client,
        second_id,
        "complete-diagnosis",
        json!({"actor_id": 1, "repair_part_type": "SSD", "diagnosis_result": "Drive failure"}),
    )
    .await;

    let response = transition(
        &client,
        second_id,
        "reserve",
        json!({"actor_id": 1, "inventory_item_id": item_id}),
    )
    .await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error"], "InventoryConflict");
}

#[tokio::test]
#[ignore]
async fn test_concurrent_reserve_single_winner() {
    let client = Client::new();
    let item_id = unique_id();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let record = create_defect(&client, unique_id()).await;
        let id = record["id"].as_i64().expect("No id");
        transition(&client, id, "start-diagnosis", json!({"actor_id": 1})).await;
        transition(
            &client,
            id,
            "complete-diagnosis",
            json!({"actor_id": 1, "repair_part_type": "HDD", "diagnosis_result": "Drive failure"}),
        )
        .await;
        ids.push(id);
    }

    let (a, b) = tokio::join!(
        transition(
            &client,
            ids[0],
            "reserve",
            json!({"actor_id": 1, "inventory_item_id": item_id})
        ),
        transition(
            &client,
            ids[1],
            "reserve",
            json!({"actor_id": 2, "inventory_item_id": item_id})
        )
    );

    let statuses = [a.status().as_u16(), b.status().as_u16()];
    assert!(
        statuses.contains(&200) && statuses.contains(&409),
        "Expected one success and one conflict, got {:?}",
        statuses
    );
}

// Scenario C: substitute exclusivity and release on return
#[tokio::test]
#[ignore]
async fn test_substitute_exclusivity() {
    let client = Client::new();
    let substitute_id = unique_id();

    let first = create_defect(&client, unique_id()).await;
    let first_id = first["id"].as_i64().expect("No id");
    let second = create_defect(&client, unique_id()).await;
    let second_id = second["id"].as_i64().expect("No id");

    let response = transition(
        &client,
        first_id,
        "substitute",
        json!({"actor_id": 1, "substitute_server_id": substitute_id}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(
        body["substitute_assignment"]["substitute_server_id"],
        substitute_id
    );

    let response = transition(
        &client,
        second_id,
        "substitute",
        json!({"actor_id": 1, "substitute_server_id": substitute_id}),
    )
    .await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error"], "SubstituteUnavailable");

    // Returning frees the server for the second record
    let response = transition(&client, first_id, "substitute/return", json!({"actor_id": 1})).await;
    assert_eq!(response.status(), 200);

    let response = transition(
        &client,
        second_id,
        "substitute",
        json!({"actor_id": 1, "substitute_server_id": substitute_id}),
    )
    .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
#[ignore]
async fn test_availability_probes() {
    let client = Client::new();
    let item_id = unique_id();
    let substitute_id = unique_id();

    let body: Value = client
        .get(format!("{}/inventory/{}/availability", BASE_URL, item_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(body["available"], true);

    // Reserving flips the probe
    let record = create_defect(&client, unique_id()).await;
    let id = record["id"].as_i64().expect("No id");
    transition(&client, id, "start-diagnosis", json!({"actor_id": 1})).await;
    transition(
        &client,
        id,
        "complete-diagnosis",
        json!({"actor_id": 1, "repair_part_type": "RAID", "diagnosis_result": "Controller failure"}),
    )
    .await;
    transition(
        &client,
        id,
        "reserve",
        json!({"actor_id": 1, "inventory_item_id": item_id}),
    )
    .await;

    let body: Value = client
        .get(format!("{}/inventory/{}/availability", BASE_URL, item_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(body["available"], false);

    // Issuing a substitute flips its probe too
    let body: Value = client
        .get(format!("{}/substitutes/{}/availability", BASE_URL, substitute_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(body["available"], true);

    transition(
        &client,
        id,
        "substitute",
        json!({"actor_id": 1, "substitute_server_id": substitute_id}),
    )
    .await;

    let body: Value = client
        .get(format!("{}/substitutes/{}/availability", BASE_URL, substitute_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(body["available"], false);
}

#[tokio::test]
#[ignore]
async fn test_server_under_repair_cannot_substitute() {
    let client = Client::new();
    let broken_server = unique_id();

    // The broken server has its own open record
    create_defect(&client, broken_server).await;

    let other = create_defect(&client, unique_id()).await;
    let other_id = other["id"].as_i64().expect("No id");

    let response = transition(
        &client,
        other_id,
        "substitute",
        json!({"actor_id": 1, "substitute_server_id": broken_server}),
    )
    .await;
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["error"], "SubstituteUnavailable");
}

#[tokio::test]
#[ignore]
async fn test_vendor_rma_path() {
    let client = Client::new();
    let record = create_defect(&client, unique_id()).await;
    let id = record["id"].as_i64().expect("No id");

    transition(&client, id, "start-diagnosis", json!({"actor_id": 1})).await;
    transition(
        &client,
        id,
        "complete-diagnosis",
        json!({"actor_id": 1, "repair_part_type": "MOTHERBOARD", "diagnosis_result": "Board failure"}),
    )
    .await;

    // WAITING_PARTS -> SENT_TO_VENDOR
    let response = transition(
        &client,
        id,
        "send-to-vendor",
        json!({"actor_id": 1, "vendor_ticket_number": "RMA-2024-0117"}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "SENT_TO_VENDOR");
    assert_eq!(body["vendor_ticket_number"], "RMA-2024-0117");
    assert!(!body["sent_to_vendor_at"].is_null());

    let response = transition(&client, id, "return-from-vendor", json!({"actor_id": 1})).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "RETURNED");
    assert!(!body["returned_from_vendor_at"].is_null());

    // RETURNED records can resolve directly
    let response = transition(
        &client,
        id,
        "resolve",
        json!({"actor_id": 1, "resolution": "Board replaced by vendor"}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "RESOLVED");
}

#[tokio::test]
#[ignore]
async fn test_replacement_consumes_reservation() {
    let client = Client::new();
    let id = defect_in_repair(&client, unique_id(), "PSU").await;

    let response = transition(
        &client,
        id,
        "replacement",
        json!({
            "actor_id": 1,
            "replacement_part_serial_vendor": "VND-55011",
            "replacement_part_serial_manufacturer": "MFG-90772"
        }),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "REPAIRING");
    assert_eq!(body["replacement_part_serial_vendor"], "VND-55011");
    assert!(body["active_reservation"].is_null());
}

// Close-cascade: resolving releases the reservation and returns the
// substitute
#[tokio::test]
#[ignore]
async fn test_resolve_releases_resources() {
    let client = Client::new();
    let id = defect_in_repair(&client, unique_id(), "FAN").await;

    let response = transition(
        &client,
        id,
        "substitute",
        json!({"actor_id": 1, "substitute_server_id": unique_id()}),
    )
    .await;
    assert_eq!(response.status(), 200);

    let response = transition(
        &client,
        id,
        "resolve",
        json!({"actor_id": 1, "resolution": "Fan assembly replaced"}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "RESOLVED");
    assert!(!body["resolved_at"].is_null());
    assert!(body["active_reservation"].is_null());
    assert!(body["substitute_assignment"].is_null());
    assert!(body["substitute_server_serial"].is_null());
}

// Scenario D: a recurrence within the lookback window resolves to REPEATED
#[tokio::test]
#[ignore]
async fn test_repeated_defect_classification() {
    let client = Client::new();
    let server_id = unique_id();

    // First HDD defect, resolved now
    let first_id = defect_in_repair(&client, server_id, "HDD").await;
    let response = transition(
        &client,
        first_id,
        "resolve",
        json!({"actor_id": 1, "resolution": "Drive replaced"}),
    )
    .await;
    assert_eq!(response.status(), 200);

    // Same server fails again with the same part
    let second_id = defect_in_repair(&client, server_id, "HDD").await;
    let record: Value = client
        .get(format!("{}/defects/{}", BASE_URL, second_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(record["is_repeated_defect"], true);

    let response = transition(
        &client,
        second_id,
        "resolve",
        json!({"actor_id": 1, "resolution": "Drive replaced again"}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "REPEATED");
}

// Scenario E: administrative closure, then terminal immutability
#[tokio::test]
#[ignore]
async fn test_closed_records_are_immutable() {
    let client = Client::new();
    let id = defect_in_repair(&client, unique_id(), "NIC").await;

    transition(
        &client,
        id,
        "resolve",
        json!({"actor_id": 1, "resolution": "NIC reseated"}),
    )
    .await;

    // RESOLVED -> CLOSED through the override succeeds once
    let response = client
        .put(format!("{}/defects/{}/status", BASE_URL, id))
        .json(&json!({"actor_id": 1, "status": "CLOSED", "comment": "archived"}))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "CLOSED");

    // Nothing leaves CLOSED, not even the override
    let response = client
        .put(format!("{}/defects/{}/status", BASE_URL, id))
        .json(&json!({"actor_id": 1, "status": "REPAIRING"}))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 409);

    let response = transition(&client, id, "start-repair", json!({"actor_id": 1})).await;
    assert_eq!(response.status(), 409);

    // Read-only queries still work
    let response = client
        .get(format!("{}/defects/{}", BASE_URL, id))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 200);

    // The notes edit is the one surviving mutation
    let response = client
        .patch(format!("{}/defects/{}/notes", BASE_URL, id))
        .json(&json!({"actor_id": 1, "notes": "post-closure annotation"}))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 200);
}

#[tokio::test]
#[ignore]
async fn test_sla_breach_computed_and_frozen() {
    let client = Client::new();
    let server_id = unique_id();

    // Detected 60 days ago: far past every configured window
    let detected = (chrono::Utc::now() - chrono::Duration::days(60)).to_rfc3339();
    let response = Client::new()
        .post(format!("{}/defects", BASE_URL))
        .json(&json!({
            "server_id": server_id,
            "problem_description": "Intermittent reboots",
            "detected_at": detected,
            "actor_id": 1
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.expect("Failed to parse response");
    let id = body["id"].as_i64().expect("No id");
    assert_eq!(body["sla_breached"], true);

    // Resolution freezes the breach flag
    transition(&client, id, "start-diagnosis", json!({"actor_id": 1})).await;
    transition(
        &client,
        id,
        "complete-diagnosis",
        json!({"actor_id": 1, "repair_part_type": "BMC", "diagnosis_result": "Firmware fault"}),
    )
    .await;
    transition(
        &client,
        id,
        "reserve",
        json!({"actor_id": 1, "inventory_item_id": unique_id()}),
    )
    .await;
    transition(&client, id, "start-repair", json!({"actor_id": 1})).await;
    let response = transition(
        &client,
        id,
        "resolve",
        json!({"actor_id": 1, "resolution": "BMC reflashed"}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["sla_breached"], false);
}

#[tokio::test]
#[ignore]
async fn test_available_actions_follow_status() {
    let client = Client::new();
    let record = create_defect(&client, unique_id()).await;
    let id = record["id"].as_i64().expect("No id");

    let body: Value = client
        .get(format!("{}/defects/{}/actions", BASE_URL, id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    let actions = body["actions"].as_array().expect("No actions array");
    assert!(actions.contains(&json!("startDiagnosis")));
    assert!(!actions.contains(&json!("resolve")));
    assert!(!actions.contains(&json!("returnSubstitute")));
}

#[tokio::test]
#[ignore]
async fn test_history_records_transitions() {
    let client = Client::new();
    let record = create_defect(&client, unique_id()).await;
    let id = record["id"].as_i64().expect("No id");

    transition(&client, id, "start-diagnosis", json!({"actor_id": 3})).await;

    let events: Value = client
        .get(format!("{}/defects/{}/history", BASE_URL, id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    let events = events.as_array().expect("No events array");
    assert!(events.len() >= 2);
    assert_eq!(events[0]["operation"], "create");
    assert_eq!(events[1]["operation"], "startDiagnosis");
    assert_eq!(events[1]["actor_id"], 3);
    assert_eq!(events[1]["from_status"], "NEW");
    assert_eq!(events[1]["to_status"], "DIAGNOSING");
}

#[tokio::test]
#[ignore]
async fn test_list_and_stats() {
    let client = Client::new();
    let server_id = unique_id();
    create_defect(&client, server_id).await;

    let body: Value = client
        .get(format!("{}/defects?server_id={}", BASE_URL, server_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(body["total"], 1);
    assert_eq!(body["rows"][0]["server_id"], server_id);

    let body: Value = client
        .get(format!("{}/defects/stats?server_id={}", BASE_URL, server_id))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(body["total"], 1);
    assert_eq!(body["by_status"][0]["label"], "NEW");
}
