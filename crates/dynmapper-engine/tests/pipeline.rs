//! End-to-end evaluation tests (dry run unless stated otherwise).

use serde_json::{json, Value};
use std::sync::Arc;

use dynmapper_core::{
    MapperConfig, MapperError, Mapping, MappingType, RepairStrategy, RequestMethod, RequestStatus,
    Substitution, TargetApi,
};
use dynmapper_engine::{InMemoryPlatform, MappingProcessor, ProcessingState};

fn processor(platform: &Arc<InMemoryPlatform>, send: bool) -> MappingProcessor {
    let config = MapperConfig::default().with_send_payload(send);
    MappingProcessor::new(config, platform.clone(), platform.clone())
}

fn temperature_mapping() -> Mapping {
    Mapping::new(
        "temperature",
        TargetApi::Measurement,
        json!({
            "type": "c8y_TemperatureMeasurement",
            "c8y_TemperatureMeasurement": {"T": {"value": 0, "unit": "C"}}
        })
        .to_string(),
    )
    .with_substitution(Substitution::new("$.temp", "c8y_TemperatureMeasurement.T.value"))
}

fn payload(value: Value) -> Vec<u8> {
    value.to_string().into_bytes()
}

#[tokio::test]
async fn test_single_measurement_with_synthesized_time() {
    let platform = Arc::new(InMemoryPlatform::new());
    let result = processor(&platform, false)
        .evaluate(&temperature_mapping(), &payload(json!({"temp": 21.5})), "measurement/berlin_01", None)
        .await
        .unwrap();

    assert_eq!(result.fan_out, 1);
    assert_eq!(result.requests.len(), 1);
    let request = &result.requests[0];
    assert_eq!(request.method, RequestMethod::Post);
    assert_eq!(request.target_api, TargetApi::Measurement);
    assert_eq!(request.status(), RequestStatus::Recorded);
    assert_eq!(request.request["c8y_TemperatureMeasurement"]["T"]["value"], json!(21.5));
    assert_eq!(request.request["c8y_TemperatureMeasurement"]["T"]["unit"], "C");
    assert!(request.request["time"].is_string());
    assert_eq!(result.state, ProcessingState::Completed);
    assert!(result.errors.is_empty());
    assert_eq!(platform.object_count(), 0);
}

#[tokio::test]
async fn test_expanded_array_fans_out() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = Mapping::new(
        "counter",
        TargetApi::Measurement,
        r#"{"type": "c8y_Counter", "c8y_Counter": {"C": {"value": 0}}}"#,
    )
    .with_substitution(Substitution::new("$.device", "source.id"))
    .with_substitution(
        Substitution::new("$.readings", "c8y_Counter.C.value").with_expand_array(true),
    );

    let result = processor(&platform, false)
        .evaluate(&mapping, &payload(json!({"device": "4711", "readings": [1, 2, 3]})), "counter", None)
        .await
        .unwrap();

    assert_eq!(result.fan_out, 3);
    let values: Vec<Value> = result
        .requests
        .iter()
        .map(|r| r.request["c8y_Counter"]["C"]["value"].clone())
        .collect();
    assert_eq!(values, vec![json!(1), json!(2), json!(3)]);
    for (i, request) in result.requests.iter().enumerate() {
        assert_eq!(request.index, i);
        assert_eq!(request.request["source"]["id"], "4711");
        assert!(request.predecessor.is_none());
    }
}

#[tokio::test]
async fn test_unknown_device_without_creation_aborts() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = temperature_mapping()
        .with_substitution(Substitution::new("$.serial", "source.id").with_resolve_to_external_id(true))
        .with_external_id_type("c8y_Serial");

    let err = processor(&platform, true)
        .evaluate(&mapping, &payload(json!({"serial": "berlin_01", "temp": 20})), "t", None)
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    match err {
        MapperError::UnresolvedIdentifier {
            external_id,
            external_id_type,
        } => {
            assert_eq!(external_id, "berlin_01");
            assert_eq!(external_id_type, "c8y_Serial");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(platform.object_count(), 0);
}

#[tokio::test]
async fn test_dry_run_device_creation_is_chained() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = temperature_mapping()
        .with_substitution(Substitution::new("$.serial", "source.id").with_resolve_to_external_id(true))
        .with_external_id_type("c8y_Serial")
        .with_create_non_existing_device(true);

    let result = processor(&platform, false)
        .evaluate(&mapping, &payload(json!({"serial": "berlin_01", "temp": 20})), "t", None)
        .await
        .unwrap();

    assert_eq!(result.requests.len(), 2);
    let device = &result.requests[0];
    let content = &result.requests[1];
    assert_eq!(device.target_api, TargetApi::Inventory);
    assert_eq!(device.method, RequestMethod::Post);
    assert_eq!(device.request["c8y_IsDevice"], json!({}));
    assert_eq!(device.request["name"], "device_c8y_Serial_berlin_01");
    assert_eq!(content.predecessor, Some(0));

    let internal_id = device.source_device_ref.clone().unwrap();
    assert_eq!(content.request["source"]["id"], json!(internal_id));
    assert_eq!(content.external_id.as_deref(), Some("berlin_01"));
    assert_eq!(result.summary().recorded, 2);
    assert_eq!(platform.object_count(), 0);
}

#[tokio::test]
async fn test_device_created_once_per_evaluation() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = temperature_mapping()
        .with_substitution(
            Substitution::new("$.serials", "source.id")
                .with_resolve_to_external_id(true)
                .with_expand_array(true),
        )
        .with_external_id_type("c8y_Serial")
        .with_create_non_existing_device(true);

    let result = processor(&platform, false)
        .evaluate(
            &mapping,
            &payload(json!({"serials": ["a", "a", "b"], "temp": 20})),
            "t",
            None,
        )
        .await
        .unwrap();

    let inventory: Vec<_> = result
        .requests
        .iter()
        .filter(|r| r.target_api == TargetApi::Inventory)
        .collect();
    assert_eq!(inventory.len(), 2);
    assert_eq!(result.requests.len(), 5);

    let contents: Vec<_> = result
        .requests
        .iter()
        .filter(|r| r.target_api == TargetApi::Measurement)
        .collect();
    assert_eq!(contents[0].predecessor, contents[1].predecessor);
    assert_eq!(contents[0].request["source"]["id"], contents[1].request["source"]["id"]);
    assert_ne!(contents[0].request["source"]["id"], contents[2].request["source"]["id"]);
}

#[tokio::test]
async fn test_fan_out_is_one_without_identifier() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = Mapping::new("m", TargetApi::Event, r#"{"type": "e", "text": ""}"#)
        .with_substitution(Substitution::new("$.texts", "text").with_expand_array(true));

    let result = processor(&platform, false)
        .evaluate(&mapping, &payload(json!({"texts": ["a", "b", "c"]})), "t", None)
        .await
        .unwrap();

    assert_eq!(result.fan_out, 1);
    assert_eq!(result.requests.len(), 1);
    assert_eq!(result.requests[0].request["text"], "a");
}

#[tokio::test]
async fn test_unexpanded_array_is_one_value() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = Mapping::new("m", TargetApi::Event, r#"{"type": "e", "values": null}"#)
        .with_substitution(Substitution::new("$.device", "source.id"))
        .with_substitution(Substitution::new("$.readings", "values"));

    let result = processor(&platform, false)
        .evaluate(&mapping, &payload(json!({"device": "1", "readings": [1, 2, 3]})), "t", None)
        .await
        .unwrap();

    assert_eq!(result.fan_out, 1);
    assert_eq!(result.requests[0].request["values"], json!([1, 2, 3]));
}

#[tokio::test]
async fn test_scalar_broadcast_across_fan_out() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = Mapping::new("m", TargetApi::Event, r#"{"type": "e", "text": "", "site": ""}"#)
        .with_substitution(Substitution::new("$.devices", "source.id").with_expand_array(true))
        .with_substitution(Substitution::new("$.site", "site"));

    let result = processor(&platform, false)
        .evaluate(&mapping, &payload(json!({"devices": ["1", "2"], "site": "berlin"})), "t", None)
        .await
        .unwrap();

    assert_eq!(result.fan_out, 2);
    for request in &result.requests {
        assert_eq!(request.request["site"], "berlin");
    }
    assert_eq!(result.requests[1].request["source"]["id"], "2");
}

#[tokio::test]
async fn test_remove_strategies() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = Mapping::new(
        "m",
        TargetApi::Event,
        r#"{"type": "e", "text": "t", "optional": "x", "nullable": "y", "kept": "z"}"#,
    )
    .with_substitution(
        Substitution::new("$.missing", "optional").with_repair_strategy(RepairStrategy::RemoveIfMissing),
    )
    .with_substitution(
        Substitution::new("$.empty", "nullable").with_repair_strategy(RepairStrategy::RemoveIfNull),
    )
    .with_substitution(Substitution::new("$.missing", "kept"));

    let result = processor(&platform, false)
        .evaluate(&mapping, &payload(json!({"empty": null})), "t", None)
        .await
        .unwrap();

    let object = result.requests[0].request.as_object().unwrap();
    assert!(!object.contains_key("optional"));
    assert!(!object.contains_key("nullable"));
    assert_eq!(object["kept"], "z");
}

#[tokio::test]
async fn test_evaluation_is_repeatable() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = temperature_mapping().with_substitution(Substitution::new("$.ts", "time"));
    let raw = payload(json!({"temp": 19, "ts": "2026-01-01T00:00:00.000Z"}));
    let processor = processor(&platform, false);

    let first = processor.evaluate(&mapping, &raw, "t", None).await.unwrap();
    let second = processor.evaluate(&mapping, &raw, "t", None).await.unwrap();
    assert_eq!(first.requests, second.requests);
    assert_eq!(first.requests[0].request["time"], "2026-01-01T00:00:00.000Z");
}

#[tokio::test]
async fn test_failed_expression_is_isolated() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = temperature_mapping()
        .with_substitution(Substitution::new("$[?(@.a ==", "c8y_Broken"));

    let result = processor(&platform, false)
        .evaluate(&mapping, &payload(json!({"temp": 21})), "t", None)
        .await
        .unwrap();

    assert_eq!(result.requests.len(), 1);
    assert_eq!(result.requests[0].request["c8y_TemperatureMeasurement"]["T"]["value"], 21);
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test]
async fn test_topic_levels_and_key() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = Mapping::new("m", TargetApi::Event, r#"{"type": "e", "text": ""}"#)
        .with_substitution(Substitution::new("$._TOPIC_LEVEL_[1]", "source.id"))
        .with_substitution(Substitution::new("$._CONTEXT_DATA_.key", "text"));

    let result = processor(&platform, false)
        .evaluate(&mapping, &payload(json!({})), "/event/berlin_01/", Some("k-1"))
        .await
        .unwrap();

    assert_eq!(result.requests[0].request["source"]["id"], "berlin_01");
    assert_eq!(result.requests[0].request["text"], "k-1");
}

#[tokio::test]
async fn test_filter_rejects_message() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = temperature_mapping().with_filter("$.active");
    let processor = processor(&platform, false);

    let ignored = processor
        .evaluate(&mapping, &payload(json!({"active": false, "temp": 1})), "t", None)
        .await
        .unwrap();
    assert!(ignored.ignored);
    assert!(ignored.requests.is_empty());
    assert_eq!(ignored.state, ProcessingState::Ignored);

    let accepted = processor
        .evaluate(&mapping, &payload(json!({"active": true, "temp": 1})), "t", None)
        .await
        .unwrap();
    assert!(!accepted.ignored);
    assert_eq!(accepted.requests.len(), 1);
}

#[tokio::test]
async fn test_flat_file_mapping() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = Mapping::new("csv", TargetApi::Measurement, r#"{"type": "c8y_Temp", "c8y_Temp": {"T": {"value": 0}}}"#)
        .with_mapping_type(MappingType::FlatFile)
        .with_substitution(Substitution::new("$._FIELDS_[0]", "source.id"))
        .with_substitution(Substitution::new("$._FIELDS_[1]", "c8y_Temp.T.value"));

    let result = processor(&platform, false)
        .evaluate(&mapping, b"4711, 21.5", "csv", None)
        .await
        .unwrap();

    let request = &result.requests[0].request;
    assert_eq!(request["source"]["id"], "4711");
    // fields are text; typing them is up to the expression
    assert_eq!(request["c8y_Temp"]["T"]["value"], json!("21.5"));
}

#[tokio::test]
async fn test_hex_mapping() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = Mapping::new("hex", TargetApi::Event, r#"{"type": "c8y_Raw", "text": "", "c8y_Raw": {"value": 0}}"#)
        .with_mapping_type(MappingType::Hex)
        .with_substitution(Substitution::new("$.message", "c8y_Raw.value"));

    let result = processor(&platform, false)
        .evaluate(&mapping, b"0A1B", "hex", None)
        .await
        .unwrap();

    assert_eq!(result.requests[0].request["c8y_Raw"]["value"], json!("0x0a1b"));
}

#[tokio::test]
async fn test_numeric_looking_strings_kept_verbatim() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = Mapping::new("codes", TargetApi::Event, r#"{"type": "c8y_Code", "text": ""}"#)
        .with_substitution(Substitution::new("$.code", "text"))
        .with_substitution(Substitution::new("$.serial", "c8y_Serial"))
        .with_substitution(Substitution::new("$.values", "c8y_Values"));

    let result = processor(&platform, false)
        .evaluate(
            &mapping,
            &payload(json!({
                "code": "007",
                "serial": "12345678901234567890",
                "values": ["1", "0x10"]
            })),
            "t",
            None,
        )
        .await
        .unwrap();

    let request = &result.requests[0].request;
    assert_eq!(request["text"], json!("007"));
    assert_eq!(request["c8y_Serial"], json!("12345678901234567890"));
    assert_eq!(request["c8y_Values"], json!(["1", "0x10"]));
}

#[tokio::test]
async fn test_malformed_payload_aborts() {
    let platform = Arc::new(InMemoryPlatform::new());
    let err = processor(&platform, false)
        .evaluate(&temperature_mapping(), b"{not json", "t", None)
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::Deserialization(_)));

    let hex = Mapping::new("hex", TargetApi::Event, "{}").with_mapping_type(MappingType::Hex);
    let err = processor(&platform, false)
        .evaluate(&hex, b"ABC", "t", None)
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::Deserialization(_)));
}

#[tokio::test]
async fn test_out_of_range_target_index_rejected() {
    let platform = Arc::new(InMemoryPlatform::new());
    let mapping = temperature_mapping()
        .with_substitution(Substitution::new("$.temp", "c8y_List[18446744073709551615]"));
    let err = processor(&platform, false)
        .evaluate(&mapping, &payload(json!({"temp": 1})), "t", None)
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::InvalidMapping(_)));
}

#[tokio::test]
async fn test_mapping_from_wire_json() {
    let mapping: Mapping = serde_json::from_value(json!({
        "id": "wire",
        "targetAPI": "EVENT",
        "mappingType": "JSON",
        "targetTemplate": "{\"type\": \"c8y_Door\", \"text\": \"\"}",
        "externalIdType": "c8y_Serial",
        "createNonExistingDevice": true,
        "substitutions": [
            {"pathSource": "$.serial", "pathTarget": "source.id", "resolve2ExternalId": true},
            {"pathSource": "$.state", "pathTarget": "text", "repairStrategy": "REMOVE_IF_MISSING"}
        ]
    }))
    .unwrap();

    let platform = Arc::new(InMemoryPlatform::new());
    platform.register_identity("c8y_Serial", "door_7", "1234");
    let result = processor(&platform, false)
        .evaluate(&mapping, &payload(json!({"serial": "door_7", "state": "open"})), "t", None)
        .await
        .unwrap();

    assert_eq!(result.requests.len(), 1);
    assert_eq!(result.requests[0].request["source"]["id"], "1234");
    assert_eq!(result.requests[0].request["text"], "open");
}
