//! End-to-end reconciliation against the in-memory control plane.
//!
//! Time is paused so every poll interval, debounce and retry backoff
//! auto-advances.

use std::sync::Arc;
use std::time::Duration;

use gpcn_provisioner::{
    Machine, MachineResource, MachineSpec, ManagedResource, MockCloud, MockFailure, NetworkResource, NetworkSpec,
    NetworkType, PollingConfig, ProvisionError, Provisioner, VolumeResource, VolumeSpec, VolumeType,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn setup() -> (Arc<MockCloud>, Provisioner) {
    setup_with(PollingConfig::default())
}

fn setup_with(polling: PollingConfig) -> (Arc<MockCloud>, Provisioner) {
    let cloud = Arc::new(MockCloud::new());
    let ctx = Provisioner::new(cloud.clone(), polling);
    (cloud, ctx)
}

fn machine_spec(networks: &[&str]) -> MachineSpec {
    MachineSpec {
        name: "web".to_string(),
        datacenter_id: "dc-1".to_string(),
        image: "Ubuntu 22.04".to_string(),
        size: "Standard".to_string(),
        networks: networks.iter().map(|n| n.to_string()).collect(),
        volumes: Vec::new(),
        allocate_public_ip: false,
        wait_for_startup: true,
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Networks
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_standard_network_gets_gateway_and_snat() {
    let (_cloud, ctx) = setup();
    let networks = NetworkResource::new(ctx);

    let spec = NetworkSpec {
        name: "app".to_string(),
        description: "application tier".to_string(),
        datacenter_id: "dc-1".to_string(),
        network_type: NetworkType::Standard,
        cidr_block: Some("10.0.0.0/24".to_string()),
        dhcp_start_address: Some("10.0.0.10".to_string()),
        dhcp_end_address: Some("10.0.0.200".to_string()),
        dns_servers: strings(&["1.1.1.1", "8.8.8.8"]),
    };
    let applied = networks.create(&spec).await.unwrap();
    let state = applied.state;

    assert!(applied.warnings.is_empty());
    assert_eq!(state.gateway, "10.0.0.1");
    assert_eq!(state.snat, "Enabled");
    assert_eq!(state.network_type, "standard");
    assert_eq!(state.dhcp_start_address.as_deref(), Some("10.0.0.10"));
    assert_eq!(state.dns_servers, "1.1.1.1,8.8.8.8");
    assert_eq!(state.datacenter_id, "dc-1");
}

#[tokio::test(start_paused = true)]
async fn test_standard_network_requires_addressing() {
    let (cloud, ctx) = setup();
    let networks = NetworkResource::new(ctx);

    let spec = NetworkSpec {
        name: "app".to_string(),
        description: String::new(),
        datacenter_id: "dc-1".to_string(),
        network_type: NetworkType::Standard,
        cidr_block: None,
        dhcp_start_address: None,
        dhcp_end_address: None,
        dns_servers: Vec::new(),
    };
    let err = networks.create(&spec).await.unwrap_err();
    assert!(matches!(err.root_cause(), ProvisionError::Validation(_)));
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_network_type_change_requires_replacement() {
    let (cloud, ctx) = setup();
    let net = cloud.seed_network("lan", NetworkType::Custom, "192.168.0.0/24");
    let networks = NetworkResource::new(ctx);

    let prior = NetworkSpec {
        name: "lan".to_string(),
        description: String::new(),
        datacenter_id: "dc-1".to_string(),
        network_type: NetworkType::Custom,
        cidr_block: None,
        dhcp_start_address: None,
        dhcp_end_address: None,
        dns_servers: Vec::new(),
    };
    let desired = NetworkSpec {
        network_type: NetworkType::Standard,
        ..prior.clone()
    };
    let err = networks.update(&net, &prior, &desired).await.unwrap_err();
    assert!(err.to_string().contains("network_type"));
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_network_delete_detaches_every_machine_first() {
    let (cloud, ctx) = setup();
    let other = cloud.seed_network("other", NetworkType::Standard, "10.1.0.0/24");
    let net = cloud.seed_network("doomed", NetworkType::Standard, "10.2.0.0/24");
    let solo = cloud.seed_machine("solo", &[&net], Machine::RUNNING);
    let dual = cloud.seed_machine("dual", &[&other, &net], Machine::RUNNING);

    ctx.orchestrator().delete_network(&net).await.unwrap();

    let solo_nic = "nic-1";
    let dual_nic = "nic-3";
    assert_eq!(
        cloud.mutations(),
        vec![
            format!("detach_interface {} {}", solo, solo_nic),
            format!("detach_interface {} {}", dual, dual_nic),
            format!("delete_network {}", net),
        ]
    );
    assert!(cloud.network(&net).is_none());
    assert_eq!(cloud.interfaces_of(&dual).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_network_delete_elects_primary_before_detaching() {
    let (cloud, ctx) = setup();
    let net = cloud.seed_network("doomed", NetworkType::Standard, "10.2.0.0/24");
    let other = cloud.seed_network("other", NetworkType::Standard, "10.1.0.0/24");
    let vm = cloud.seed_machine("web", &[&net, &other], Machine::RUNNING);

    ctx.orchestrator().delete_network(&net).await.unwrap();

    assert_eq!(
        cloud.mutations(),
        vec![
            format!("set_primary_interface {} nic-2", vm),
            format!("detach_interface {} nic-1", vm),
            format!("delete_network {}", net),
        ]
    );
    let nics = cloud.interfaces_of(&vm);
    assert_eq!(nics.len(), 1);
    assert!(nics[0].is_primary);
    assert_eq!(nics[0].network_id, other);
}

#[tokio::test(start_paused = true)]
async fn test_network_delete_retries_conflicts() {
    let (cloud, ctx) = setup();
    let net = cloud.seed_network("busy", NetworkType::Custom, "192.168.0.0/24");
    cloud.fail_times("delete_network", MockFailure::Status(409), 2);

    ctx.orchestrator().delete_network(&net).await.unwrap();

    let attempts = cloud
        .mutations()
        .iter()
        .filter(|c| c.starts_with("delete_network"))
        .count();
    assert_eq!(attempts, 3);
    assert!(cloud.network(&net).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_network_delete_gives_up_after_configured_attempts() {
    let (cloud, ctx) = setup_with(PollingConfig {
        delete_retry_attempts: 2,
        ..PollingConfig::default()
    });
    let net = cloud.seed_network("busy", NetworkType::Custom, "192.168.0.0/24");
    cloud.fail_times("delete_network", MockFailure::Status(409), 5);

    let err = ctx.orchestrator().delete_network(&net).await.unwrap_err();

    assert!(err.to_string().contains("attempt 2 of 2"));
    assert!(matches!(err.root_cause(), ProvisionError::HttpStatus { status: 409, .. }));
    assert!(cloud.network(&net).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_deleting_missing_network_is_a_no_op() {
    let (cloud, ctx) = setup();
    ctx.orchestrator().delete_network("net-404").await.unwrap();
    assert!(cloud.mutations().is_empty());
}

// =============================================================================
// Virtual machines
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_create_machine_reports_failed_attach_as_warning() {
    let (cloud, ctx) = setup();
    let net = cloud.seed_network("app", NetworkType::Standard, "10.0.0.0/24");
    let machines = MachineResource::new(ctx);

    let mut spec = machine_spec(&[&net]);
    spec.volumes = strings(&["vol-missing"]);
    let applied = machines.create(&spec).await.unwrap();

    assert_eq!(applied.warnings.len(), 1);
    assert!(applied.warnings[0].summary.contains("attach volume vol-missing"));
    assert_eq!(applied.state.status, Machine::RUNNING);
    assert_eq!(applied.state.network_ids, vec![net.clone()]);
    assert_eq!(applied.state.volume_ids, strings(&["vol-missing"]));

    let mutations = cloud.mutations();
    assert_eq!(mutations.first().map(String::as_str), Some("create_machine web"));
    assert_eq!(mutations.last().map(String::as_str), Some("start_machine vm-1"));
}

#[tokio::test(start_paused = true)]
async fn test_create_machine_rejects_public_ip_on_custom_network() {
    let (cloud, ctx) = setup();
    let net = cloud.seed_network("l2", NetworkType::Custom, "192.168.0.0/24");

    let mut spec = machine_spec(&[&net]);
    spec.allocate_public_ip = true;
    let err = ctx.orchestrator().create_machine(&spec).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Validation(_)));
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_machine_rejects_unknown_image_with_choices() {
    let (cloud, ctx) = setup();
    let net = cloud.seed_network("app", NetworkType::Standard, "10.0.0.0/24");

    let mut spec = machine_spec(&[&net]);
    spec.image = "Windows 95".to_string();
    let err = ctx.orchestrator().create_machine(&spec).await.unwrap_err();

    assert!(err.to_string().contains("Ubuntu 22.04, Debian 12"));
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_machine_without_networks() {
    let (cloud, ctx) = setup();
    let machines = MachineResource::new(ctx);

    let applied = machines.create(&machine_spec(&[])).await.unwrap();

    assert!(applied.warnings.is_empty());
    assert_eq!(applied.state.status, Machine::RUNNING);
    assert!(applied.state.network_ids.is_empty());
    assert!(applied.state.interfaces.is_empty());
    assert_eq!(
        cloud.mutations(),
        vec!["create_machine web".to_string(), "start_machine vm-1".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_update_replaces_primary_with_single_election() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let b = cloud.seed_network("b", NetworkType::Standard, "10.0.1.0/24");
    let c = cloud.seed_network("c", NetworkType::Standard, "10.0.2.0/24");
    let vm = cloud.seed_machine("web", &[&a, &b], Machine::RUNNING);

    let prior = machine_spec(&[&a, &b]);
    let desired = machine_spec(&[&b, &c]);
    let applied = ctx.orchestrator().update_machine(&vm, &prior, &desired).await.unwrap();

    assert!(applied.warnings.is_empty());
    assert_eq!(
        cloud.mutations(),
        vec![
            format!("stop_machine {}", vm),
            format!("set_primary_interface {} nic-2", vm),
            format!("detach_interface {} nic-1", vm),
            format!("attach_interface {} {}", vm, c),
            format!("start_machine {}", vm),
        ]
    );

    let nics = cloud.interfaces_of(&vm);
    assert_eq!(nics.iter().filter(|n| n.is_primary).count(), 1);
    assert_eq!(nics.iter().find(|n| n.is_primary).unwrap().network_id, b);
    assert_eq!(applied.state.status, Machine::RUNNING);
}

#[tokio::test(start_paused = true)]
async fn test_update_attaches_replacement_before_removing_only_network() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let b = cloud.seed_network("b", NetworkType::Standard, "10.0.1.0/24");
    let vm = cloud.seed_machine("web", &[&a], Machine::RUNNING);

    let prior = machine_spec(&[&a]);
    let desired = machine_spec(&[&b]);
    ctx.orchestrator().update_machine(&vm, &prior, &desired).await.unwrap();

    assert_eq!(
        cloud.mutations(),
        vec![
            format!("stop_machine {}", vm),
            format!("attach_interface {} {}", vm, b),
            format!("set_primary_interface {} nic-2", vm),
            format!("detach_interface {} nic-1", vm),
            format!("start_machine {}", vm),
        ]
    );
    let nics = cloud.interfaces_of(&vm);
    assert_eq!(nics.len(), 1);
    assert_eq!(nics[0].network_id, b);
    assert!(nics[0].is_primary);
}

#[tokio::test(start_paused = true)]
async fn test_update_rename_only_does_not_stop() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let vm = cloud.seed_machine("web", &[&a], Machine::RUNNING);

    let prior = machine_spec(&[&a]);
    let mut desired = prior.clone();
    desired.name = "web-renamed".to_string();
    let applied = ctx.orchestrator().update_machine(&vm, &prior, &desired).await.unwrap();

    assert_eq!(cloud.mutations(), vec![format!("rename_machine {} web-renamed", vm)]);
    assert_eq!(applied.state.name, "web-renamed");
}

#[tokio::test(start_paused = true)]
async fn test_update_rejects_smaller_size_before_any_mutation() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let vm = cloud.seed_machine("web", &[&a], Machine::RUNNING);

    let prior = machine_spec(&[&a]);
    let mut desired = prior.clone();
    desired.size = "Small".to_string();
    let err = ctx.orchestrator().update_machine(&vm, &prior, &desired).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Validation(_)));
    assert!(err.to_string().contains("downsizing requires replacement"));
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_update_resizes_between_stop_and_start() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let vm = cloud.seed_machine("web", &[&a], Machine::RUNNING);

    let prior = machine_spec(&[&a]);
    let mut desired = prior.clone();
    desired.size = "Large".to_string();
    let applied = ctx.orchestrator().update_machine(&vm, &prior, &desired).await.unwrap();

    assert_eq!(
        cloud.mutations(),
        vec![
            format!("stop_machine {}", vm),
            format!("resize_machine {} 12", vm),
            format!("start_machine {}", vm),
        ]
    );
    assert_eq!(applied.state.cpu, 4);
}

#[tokio::test(start_paused = true)]
async fn test_update_stops_once_around_every_change() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let b = cloud.seed_network("b", NetworkType::Standard, "10.0.1.0/24");
    let vm = cloud.seed_machine("web", &[&a], Machine::RUNNING);
    let vol = cloud.seed_volume("data", VolumeType::Ssd, 50);

    let prior = machine_spec(&[&a]);
    let mut desired = machine_spec(&[&a, &b]);
    desired.volumes = vec![vol.clone()];
    desired.size = "Large".to_string();
    let applied = ctx.orchestrator().update_machine(&vm, &prior, &desired).await.unwrap();

    assert!(applied.warnings.is_empty());
    assert_eq!(
        cloud.mutations(),
        vec![
            format!("stop_machine {}", vm),
            format!("attach_interface {} {}", vm, b),
            format!("resize_machine {} 12", vm),
            format!("attach_volume {} {}", vol, vm),
            format!("start_machine {}", vm),
        ]
    );
    assert_eq!(cloud.volume(&vol).unwrap().machine_id.as_deref(), Some(vm.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_update_rejects_removing_every_network() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let vm = cloud.seed_machine("web", &[&a], Machine::RUNNING);

    let prior = machine_spec(&[&a]);
    let desired = machine_spec(&[]);
    let err = ctx.orchestrator().update_machine(&vm, &prior, &desired).await.unwrap_err();

    assert!(matches!(err, ProvisionError::Validation(_)));
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_update_rejects_too_many_interfaces() {
    let (cloud, ctx) = setup_with(PollingConfig {
        max_network_interfaces: 2,
        ..PollingConfig::default()
    });
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let b = cloud.seed_network("b", NetworkType::Standard, "10.0.1.0/24");
    let c = cloud.seed_network("c", NetworkType::Standard, "10.0.2.0/24");
    let vm = cloud.seed_machine("web", &[&a, &b], Machine::RUNNING);

    let prior = machine_spec(&[&a, &b]);
    let desired = machine_spec(&[&a, &b, &c]);
    let err = ctx.orchestrator().update_machine(&vm, &prior, &desired).await.unwrap_err();

    assert!(err.to_string().contains("at most 2 network interfaces"));
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_update_counts_case_variant_networks_once() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let b = cloud.seed_network("b", NetworkType::Standard, "10.0.1.0/24");
    let vm = cloud.seed_machine("web", &[&a], Machine::RUNNING);

    let prior = machine_spec(&[&a, &a.to_uppercase()]);
    let desired = machine_spec(&[&b]);
    let applied = ctx.orchestrator().update_machine(&vm, &prior, &desired).await.unwrap();

    let nics = cloud.interfaces_of(&vm);
    assert_eq!(nics.len(), 1);
    assert_eq!(nics[0].network_id, b);
    assert!(nics[0].is_primary);
    assert_eq!(applied.state.status, Machine::RUNNING);
}

#[tokio::test(start_paused = true)]
async fn test_update_allocates_public_ip_on_primary() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let vm = cloud.seed_machine("web", &[&a], Machine::RUNNING);

    let prior = machine_spec(&[&a]);
    let mut desired = prior.clone();
    desired.allocate_public_ip = true;
    ctx.orchestrator().update_machine(&vm, &prior, &desired).await.unwrap();

    assert_eq!(cloud.mutations(), vec![format!("allocate_public_ip {} nic-1", vm)]);
    assert!(!cloud.interfaces_of(&vm)[0].public_ip.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_update_step_leaves_machine_stopped() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let b = cloud.seed_network("b", NetworkType::Standard, "10.0.1.0/24");
    let vm = cloud.seed_machine("web", &[&a], Machine::RUNNING);
    cloud.fail_next("attach_interface", MockFailure::JobFailed);

    let prior = machine_spec(&[&a]);
    let desired = machine_spec(&[&a, &b]);
    let err = ctx.orchestrator().update_machine(&vm, &prior, &desired).await.unwrap_err();

    assert!(err.is_job_failure());
    assert!(err.to_string().contains("update network interfaces"));
    assert!(!cloud.mutations().iter().any(|c| c.starts_with("start_machine")));
    assert_eq!(cloud.machine(&vm).unwrap().status, Machine::SHUTOFF);
}

#[tokio::test(start_paused = true)]
async fn test_delete_machine_detaches_then_deletes() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let b = cloud.seed_network("b", NetworkType::Standard, "10.0.1.0/24");
    let vm = cloud.seed_machine("web", &[&a, &b], Machine::RUNNING);
    let vol = cloud.seed_volume("data", VolumeType::Ssd, 50);
    cloud.seed_attachment(&vol, &vm);

    let mut prior = machine_spec(&[&a, &b]);
    prior.volumes = vec![vol.clone()];
    let warnings = MachineResource::new(ctx).delete(&vm, &prior).await.unwrap();

    assert!(warnings.is_empty());
    assert_eq!(
        cloud.mutations(),
        vec![
            format!("stop_machine {}", vm),
            format!("detach_interface {} nic-2", vm),
            format!("detach_volume {}", vol),
            format!("delete_machine {}", vm),
        ]
    );
    assert!(cloud.machine(&vm).is_none());
    assert!(cloud.volume(&vol).unwrap().machine_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_delete_stopped_machine_skips_stop_and_warns_on_detach() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let vm = cloud.seed_machine("web", &[&a], Machine::SHUTOFF);

    let mut prior = machine_spec(&[&a]);
    prior.volumes = strings(&["vol-gone"]);
    let warnings = ctx
        .orchestrator()
        .delete_machine(&vm, &prior.volumes)
        .await
        .unwrap();

    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].summary.contains("detach volume vol-gone"));
    assert_eq!(
        cloud.mutations(),
        vec![format!("detach_volume vol-gone"), format!("delete_machine {}", vm)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_read_and_import_of_missing_machine() {
    let (_cloud, ctx) = setup();
    let machines = MachineResource::new(ctx);

    assert!(machines.read("vm-404", None).await.unwrap().is_none());
    let err = machines.import("vm-404").await.unwrap_err();
    assert!(err.to_string().contains("cannot import virtual machine vm-404"));
}

#[tokio::test(start_paused = true)]
async fn test_import_derives_networks_and_public_ip() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let b = cloud.seed_network("b", NetworkType::Standard, "10.0.1.0/24");
    let vm = cloud.seed_machine("web", &[&a, &b], Machine::RUNNING);

    let state = MachineResource::new(ctx).import(&vm).await.unwrap();

    assert_eq!(state.network_ids, vec![a, b]);
    assert!(!state.allocate_public_ip);
    assert_eq!(state.image, "Ubuntu 22.04");
    assert_eq!(state.configuration.get("cpu").map(String::as_str), Some("2 cores"));
}

// =============================================================================
// Volumes
// =============================================================================

fn volume_spec(size_gb: i64) -> VolumeSpec {
    VolumeSpec {
        name: "data".to_string(),
        datacenter_id: "dc-1".to_string(),
        volume_type: VolumeType::Ssd,
        size_gb,
    }
}

#[tokio::test(start_paused = true)]
async fn test_volume_create_waits_for_job() {
    let (cloud, ctx) = setup();
    cloud.script_next_job(&[(false, false), (false, false), (true, false)]);

    let applied = VolumeResource::new(ctx).create(&volume_spec(100)).await.unwrap();

    assert_eq!(cloud.job_queries("job-1"), 3);
    assert_eq!(applied.state.size_gb, 100);
    assert_eq!(applied.state.volume_type, "SSD");
}

#[tokio::test(start_paused = true)]
async fn test_volume_size_outside_catalog_rejected() {
    let (cloud, ctx) = setup();
    let err = VolumeResource::new(ctx).create(&volume_spec(75)).await.unwrap_err();

    assert!(matches!(err.root_cause(), ProvisionError::Validation(_)));
    assert!(err.to_string().contains("50 GB, 100 GB, 200 GB"));
    assert!(cloud.mutations().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_volume_grows_but_never_shrinks() {
    let (cloud, ctx) = setup();
    let vol = cloud.seed_volume("data", VolumeType::Ssd, 100);
    let volumes = VolumeResource::new(ctx);

    let applied = volumes.update(&vol, &volume_spec(100), &volume_spec(200)).await.unwrap();
    assert_eq!(applied.state.size_gb, 200);

    let err = volumes.update(&vol, &volume_spec(200), &volume_spec(50)).await.unwrap_err();
    assert!(matches!(err, ProvisionError::Validation(_)));
    assert_eq!(cloud.volume(&vol).unwrap().size_gb, 200);
}

#[tokio::test(start_paused = true)]
async fn test_volume_delete_detaches_and_tolerates_missing() {
    let (cloud, ctx) = setup();
    let a = cloud.seed_network("a", NetworkType::Standard, "10.0.0.0/24");
    let vm = cloud.seed_machine("web", &[&a], Machine::RUNNING);
    let vol = cloud.seed_volume("data", VolumeType::Ssd, 50);
    cloud.seed_attachment(&vol, &vm);
    let volumes = VolumeResource::new(ctx);

    volumes.delete(&vol, &volume_spec(50)).await.unwrap();
    assert_eq!(
        cloud.mutations(),
        vec![format!("detach_volume {}", vol), format!("delete_volume {}", vol)]
    );

    assert!(volumes.delete(&vol, &volume_spec(50)).await.unwrap().is_empty());
}

// =============================================================================
// Status polling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_machine_status_match_ignores_case_and_is_confirmed() {
    let (cloud, ctx) = setup();
    let vm = cloud.seed_machine("web", &[], "Building");
    cloud.script_statuses(&vm, &["Building", "rUnNiNg", "Building", "RUNNING", "running"]);

    let started = Instant::now();
    let machine = ctx
        .status()
        .await_machine(&vm, &[Machine::RUNNING], Duration::from_secs(120))
        .await
        .unwrap();

    // First match at 5s flips back on its confirming read; the match at 15s holds at 20s.
    assert_eq!(machine.status, "running");
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert!(started.elapsed() < Duration::from_secs(21));
    let reads = cloud.calls().iter().filter(|c| c.starts_with("get_machine")).count();
    assert_eq!(reads, 5);
}

#[tokio::test(start_paused = true)]
async fn test_machine_status_times_out_at_caller_ceiling() {
    let (cloud, ctx) = setup();
    let vm = cloud.seed_machine("web", &[], "Building");

    let started = Instant::now();
    let err = ctx
        .status()
        .await_machine(&vm, &[Machine::RUNNING], Duration::from_secs(20))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() > Duration::from_secs(20));
    assert!(started.elapsed() < Duration::from_secs(26));
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_job_wait() {
    let cloud = Arc::new(MockCloud::new());
    let cancel = CancellationToken::new();
    let ctx = Provisioner::new(cloud.clone(), PollingConfig::default()).with_cancellation(cancel.clone());
    cloud.script_next_job(&[(false, false)]);

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            cancel.cancel();
        })
    };

    let err = VolumeResource::new(ctx).create(&volume_spec(50)).await.unwrap_err();
    canceller.await.unwrap();

    assert!(err.is_cancelled());
    assert!(cloud.job_queries("job-1") >= 2);
}
