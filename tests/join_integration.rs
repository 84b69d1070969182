//! End-to-end view-join behaviour against a hand-rolled mock CouchDB.

mod support;

use habitat_uploader::{UploaderConfig, Uploader};
use serde_json::json;
use support::{Expectation, MockCouch};

fn config_for(mock: &MockCouch) -> UploaderConfig {
    UploaderConfig::new("PROXYCALL")
        .unwrap()
        .with_couch_uri(mock.url())
        .with_couch_db("habitat")
}

#[test]
fn flights_joins_payload_configuration_docs_over_http() {
    support::init_tracing();
    let mock = MockCouch::start();
    mock.expect(Expectation {
        method: "GET",
        path_contains: "_design/flight/_view/end_start_including_payloads".to_owned(),
        status: 200,
        body: json!({
            "rows": [
                {
                    "id": "flight_0",
                    "key": [0, 0, "flight_0", 0],
                    "value": null,
                    "doc": {"_id": "flight_0", "type": "flight"}
                },
                {
                    "id": "pcfg_0",
                    "key": [0, 0, "flight_0", 1],
                    "value": null,
                    "doc": {"_id": "pcfg_0", "type": "payload_configuration"}
                },
                {
                    "id": "pcfg_missing",
                    "key": [0, 0, "flight_0", 1],
                    "value": null,
                    "doc": null
                }
            ]
        }),
    });

    let mut uploader = Uploader::new(config_for(&mock)).unwrap();
    let flights = uploader.flights().unwrap();

    assert_eq!(flights.len(), 1);
    let payload_docs = flights[0]["_payload_docs"].as_array().unwrap();
    assert_eq!(payload_docs.len(), 1);
    assert_eq!(payload_docs[0]["_id"], "pcfg_0");
}

#[test]
fn payloads_returns_every_configuration_doc_over_http() {
    support::init_tracing();
    let mock = MockCouch::start();
    mock.expect(Expectation {
        method: "GET",
        path_contains: "_design/payload_configuration/_view/name_time_created".to_owned(),
        status: 200,
        body: json!({
            "rows": [
                {"id": "a", "key": ["a"], "value": null, "doc": {"_id": "a"}},
                {"id": "b", "key": ["b"], "value": null, "doc": {"_id": "b"}}
            ]
        }),
    });

    let mut uploader = Uploader::new(config_for(&mock)).unwrap();
    let payloads = uploader.payloads().unwrap();
    assert_eq!(payloads.len(), 2);
}
