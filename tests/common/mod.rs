//! Shared fixtures for integration tests.
#![allow(dead_code)]

use base64::Engine;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use lis_reconciler::adapters::sqlite::create_migrated_test_pool;
use lis_reconciler::cli::context::build_ports;
use lis_reconciler::{Config, EventEnvelope, EventProcessor, EventType, LisEvent};

/// Order O1 for patient P1, visit V1, with GLU and TSH ordered.
pub const SEED_ORDER: &str = r#"
    INSERT INTO patients (patient_id, dob, expected_dob, gender) VALUES ('P1', '1990-04-02', NULL, 'F');
    INSERT INTO orders (order_id, city_code, servicing_lab_id, patient_id, status)
        VALUES ('O1', 'BLR', 1, 'P1', 'ordered');
    INSERT INTO order_visits (visit_id, order_id, lab_id) VALUES ('V1', 'O1', 1);
    INSERT INTO order_tests (central_test_id, order_id, test_code, test_name, processing_lab_id,
        processing_lab_inhouse, barcodes)
        VALUES ('CT-GLU', 'O1', 'GLU', 'Glucose', 1, 0, '["BC-1"]'),
               ('CT-TSH', 'O1', 'TSH', 'TSH', 1, 0, '["BC-2"]');
    INSERT INTO pathologists (user_id, lis_user_id) VALUES (70, 7);
"#;

pub async fn seeded_pool() -> SqlitePool {
    let pool = create_migrated_test_pool().await.expect("migrated pool");
    sqlx::raw_sql(SEED_ORDER).execute(&pool).await.expect("seed order");
    pool
}

/// Config with fast retries and a known auto-approver for BLR.
pub fn test_config(master_data_url: Option<String>, reports_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.http.master_data_url = master_data_url;
    config.http.timeout_secs = 5;
    config.retry.anomaly_base_delay_ms = 1;
    config.retry.missing_pdf_base_delay_ms = 1;
    config.approval.auto_approval_user_ids.insert("BLR".into(), 900);
    config.reports.dir = reports_dir.to_path_buf();
    config
}

pub fn processor(config: &Config, pool: &SqlitePool) -> EventProcessor {
    EventProcessor::new(build_ports(config, pool).expect("ports"), config)
}

/// A device-measured single investigation as the LIS sends it.
pub fn device_leaf(code: &str, value: &str, status: &str) -> Value {
    json!({
        "TestID": format!("L-{code}"),
        "TestCode": code,
        "TestName": format!("{code} test"),
        "TestType": "INV",
        "TestValue": value,
        "DeviceID": "DEV1",
        "MethodName": "Hexokinase",
        "TestStatus": status,
        "ResultCapturedAt": "2026-10-01T08:00:00",
        "ResultCapturedBy": 5,
    })
}

pub fn envelope(event_type: EventType, visit_id: &str, nodes: Vec<Value>) -> EventEnvelope {
    let body = json!({
        "OrderId": visit_id,
        "ReportPDFFormat": "StationeryPDF",
        "OrderInfo": nodes,
    });
    EventEnvelope::inline(
        event_type,
        LisEvent {
            entity_id: visit_id.to_string(),
            webhook_data: base64::engine::general_purpose::STANDARD.encode(body.to_string()),
        },
    )
}

/// OMS create/update for order O1 (visit V1 at lab 1) listing `tests` as
/// (code, processing lab) pairs.
pub fn order_event(tests: &[(&str, i64)]) -> EventEnvelope {
    let tests: Vec<Value> = tests
        .iter()
        .map(|(code, lab)| {
            json!({
                "central_test_id": format!("CT-{code}"),
                "test_code": code,
                "test_name": code,
                "processing_lab_id": lab,
            })
        })
        .collect();
    EventEnvelope::new(
        EventType::OmsOrderEvent,
        json!({
            "order_id": "O1",
            "city_code": "BLR",
            "servicing_lab_id": 1,
            "status": "ordered",
            "patient": {"patient_id": "P1", "dob": "1990-04-02", "gender": "F"},
            "visits": [{"visit_id": "V1", "lab_id": 1}],
            "tests": tests,
        }),
    )
}

/// Master-data record for glucose with an auto-approval band of 50-200.
pub fn glucose_master() -> Value {
    json!({
        "investigation_id": 101,
        "investigation_name": "Glucose Fasting",
        "investigation_method_mapping_id": 1010,
        "lis_code": "GLU",
        "department_name": "clinical biochemistry",
        "method": "Hexokinase",
        "unit": "mg/dL",
        "result_type": "numeric",
        "rcv_positive": 10.0,
        "rcv_negative": -10.0,
        "reference_range": {
            "reference_label": "range",
            "normal_range": {"min_value": "70", "max_value": "100", "reference_range_text": "70 - 100"},
            "critical_range": {"min_value": "40", "max_value": "400"},
            "auto_approval_range": {"min_value": "50", "max_value": "200"}
        }
    })
}
