//! REST client behavior against a stub HTTP server.

use std::sync::Arc;
use std::time::Duration;

use gpcn_provisioner::{
    ApiConfig, CloudApi, JobState, MachineRequest, PollingConfig, ProvisionError, Provisioner, RestApi,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "test-api-key";

async fn server_and_api() -> (MockServer, RestApi) {
    let server = MockServer::start().await;
    let config = ApiConfig::new(server.uri(), KEY).with_request_timeout(Duration::from_secs(5));
    let api = RestApi::new(&config).unwrap();
    (server, api)
}

fn ok(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "message": "", "data": data }))
}

#[tokio::test]
async fn test_job_status_sends_credentials_and_ids() {
    let (server, api) = server_and_api().await;
    Mock::given(method("POST"))
        .and(path("/v1/resource/jobs/status"))
        .and(header("x-api-key", KEY))
        .and(header("content-type", "application/json"))
        .and(header_exists("x-request-id"))
        .and(body_json(json!({ "jobIds": ["job-1"] })))
        .respond_with(ok(json!({
            "jobId": "job-1",
            "isCompleted": true,
            "hasFailed": false,
            "resourceId": "net-9",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let jobs = api.job_status(&["job-1".to_string()]).await.unwrap();

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state(), JobState::Succeeded);
    assert_eq!(jobs[0].resource_id.as_deref(), Some("net-9"));
}

#[tokio::test]
async fn test_job_status_accepts_batches_and_empty_data() {
    let (server, api) = server_and_api().await;
    Mock::given(method("POST"))
        .and(path("/v1/resource/jobs/status"))
        .and(body_json(json!({ "jobIds": ["job-1", "job-2"] })))
        .respond_with(ok(json!({
            "jobs": [
                { "jobId": "job-1", "isCompleted": true, "hasFailed": false },
                { "jobId": "job-2", "isCompleted": true, "hasFailed": true },
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/resource/jobs/status"))
        .and(body_json(json!({ "jobIds": ["job-3"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&server)
        .await;

    let jobs = api
        .job_status(&["job-1".to_string(), "job-2".to_string()])
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[1].state(), JobState::Failed);

    let jobs = api.job_status(&["job-3".to_string()]).await.unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_not_found_is_recognised() {
    let (server, api) = server_and_api().await;
    Mock::given(method("GET"))
        .and(path("/v1/resource/networks/net-404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("network not found"))
        .mount(&server)
        .await;

    let err = api.get_network("net-404").await.unwrap_err();

    assert!(err.is_not_found());
    match err {
        ProvisionError::HttpStatus { status, body, method, .. } => {
            assert_eq!(status, 404);
            assert_eq!(body, "network not found");
            assert_eq!(method, "GET");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_body_is_truncated() {
    let (server, api) = server_and_api().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/resource/volumes/vol-1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(5000)))
        .mount(&server)
        .await;

    let err = api.delete_volume("vol-1").await.unwrap_err();

    assert!(!err.is_not_found());
    match err {
        ProvisionError::HttpStatus { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body.len(), 2048);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_body_is_a_decode_error() {
    let (server, api) = server_and_api().await;
    Mock::given(method("GET"))
        .and(path("/v1/resource/volumes/vol-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = api.get_volume("vol-1").await.unwrap_err();
    assert!(matches!(err, ProvisionError::Decode { .. }));
}

#[tokio::test]
async fn test_unsuccessful_envelope_is_rejected() {
    let (server, api) = server_and_api().await;
    Mock::given(method("POST"))
        .and(path("/v1/resource/virtual-machines/vm-1/network-interfaces"))
        .and(body_json(json!({ "networkId": "net-2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "interface limit reached",
        })))
        .mount(&server)
        .await;

    let err = api.attach_interface("vm-1", "net-2").await.unwrap_err();
    match err {
        ProvisionError::Rejected { message, .. } => assert_eq!(message, "interface limit reached"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_network_read_maps_wire_fields() {
    let (server, api) = server_and_api().await;
    Mock::given(method("GET"))
        .and(path("/v1/resource/networks/net-1"))
        .respond_with(ok(json!({
            "id": "net-1",
            "name": "app",
            "networkType": "Standard",
            "cidrBlock": "10.0.0.0/24",
            "gatewayIp": "10.0.0.1",
            "snat": "Enabled",
            "connectedVms": "2",
            "dnsNameservers": "1.1.1.1",
            "allocationPools": [{ "start": "10.0.0.10", "end": "10.0.0.200" }],
            "country": { "id": 1, "name": "United States" },
            "region": { "id": 4, "name": "US Central" },
            "datacenter": { "id": "dc-1", "name": "DAL1" },
            "createdAt": "2024-03-05T14:07:09Z",
        })))
        .mount(&server)
        .await;

    let network = api.get_network("net-1").await.unwrap();

    assert_eq!(network.gateway_ip, "10.0.0.1");
    assert_eq!(network.connected_machines, "2");
    assert_eq!(network.location.datacenter_id, "dc-1");
    assert_eq!(network.location.region, "US Central");
    assert_eq!(network.allocation_pools[0].end, "10.0.0.200");
}

#[tokio::test]
async fn test_catalog_queries() {
    let (server, api) = server_and_api().await;
    Mock::given(method("GET"))
        .and(path("/v1/resource/data-centers/dc-1/virtual-machine-sizes"))
        .and(query_param("imageId", "7"))
        .respond_with(ok(json!([
            { "id": 10, "name": "Small", "cpu": 1, "ram": 2, "disk": 25 },
            { "id": 11, "name": "Standard", "cpu": 2, "ram": 4, "disk": 50 },
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/resource/data-centers/dc-1/volume-sizes"))
        .respond_with(ok(json!({
            "datacenterid": "dc-1",
            "volumeTypes": [
                { "id": 1, "name": "SSD", "availableSizes": [{ "id": 101, "sizeGb": 50 }] }
            ]
        })))
        .mount(&server)
        .await;

    let sizes = api.list_sizes("dc-1", 7).await.unwrap();
    assert_eq!(sizes.len(), 2);
    assert_eq!(sizes[1].cpu, 2);

    let catalog = api.volume_catalog("dc-1").await.unwrap();
    assert_eq!(catalog[0].sizes[0].id, 101);
    assert_eq!(catalog[0].sizes[0].size_gb, 50);
}

#[tokio::test]
async fn test_datacenters_are_paged() {
    let (server, api) = server_and_api().await;
    Mock::given(method("GET"))
        .and(path("/v1/resource/data-centers"))
        .and(query_param("page", "1"))
        .and(query_param("limit", "100"))
        .respond_with(ok(json!([{
            "id": "dc-1",
            "name": "DAL1",
            "regionId": 4,
            "regionName": "US Central",
            "countryId": 1,
            "countryName": "United States",
            "countryAbbreviation": "US",
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let datacenters = api.list_datacenters().await.unwrap();

    assert_eq!(datacenters.len(), 1);
    assert_eq!(datacenters[0].region_name, "US Central");
}

#[tokio::test]
async fn test_power_actions_ignore_empty_bodies() {
    let (server, api) = server_and_api().await;
    Mock::given(method("POST"))
        .and(path("/v1/resource/virtual-machines/vm-1/start"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    api.start_machine("vm-1").await.unwrap();
}

#[tokio::test]
async fn test_delete_waits_for_job_through_the_poller() {
    let server = MockServer::start().await;
    let api = RestApi::new(&ApiConfig::new(server.uri(), KEY)).unwrap();
    let polling = PollingConfig {
        job_interval_secs: 1,
        ..PollingConfig::default()
    };
    let ctx = Provisioner::new(Arc::new(api), polling);

    Mock::given(method("DELETE"))
        .and(path("/v1/resource/networks/net-1"))
        .respond_with(ok(json!({ "jobId": "job-7", "isCompleted": false, "hasFailed": false })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/resource/jobs/status"))
        .respond_with(ok(json!({ "jobId": "job-7", "isCompleted": false, "hasFailed": false })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/resource/jobs/status"))
        .respond_with(ok(json!({ "jobId": "job-7", "isCompleted": true, "hasFailed": false })))
        .with_priority(2)
        .mount(&server)
        .await;

    ctx.networks().delete_once("net-1").await.unwrap();

    let job_queries = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/v1/resource/jobs/status")
        .count();
    assert_eq!(job_queries, 2);
}

#[tokio::test]
async fn test_create_machine_without_networks_omits_interfaces() {
    let (server, api) = server_and_api().await;
    Mock::given(method("POST"))
        .and(path("/v1/resource/virtual-machines/"))
        .and(body_json(json!({
            "allocatePublicIp": false,
            "configurationId": 3,
            "datacenterId": "dc-1",
            "imageId": 7,
            "name": "web",
            "numberOfInstances": 1,
        })))
        .respond_with(ok(json!({ "jobId": "job-4", "isCompleted": false, "hasFailed": false })))
        .expect(1)
        .mount(&server)
        .await;

    let handle = api
        .create_machine(&MachineRequest {
            name: "web".to_string(),
            datacenter_id: "dc-1".to_string(),
            image_id: 7,
            configuration_id: 3,
            allocate_public_ip: false,
            network_ids: Vec::new(),
        })
        .await
        .unwrap();

    assert_eq!(handle.ids(), vec!["job-4".to_string()]);
}
