//! Toolbox Capabilities
//!
//! One module per capability. Each exposes a typed input, a typed output and
//! an error enum implementing [`toolbox_core::DomainError`]. [`entry_points`]
//! is the table plugin manifests bind against.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bsport;
pub mod canvas;
pub mod create_gist;
pub mod deploy_compose;
pub mod download_video;
pub mod export_cookies;
pub mod ghcr_push;
pub mod infra;
pub mod netscape;
pub mod normalize_markdown;
pub mod paths;
pub mod process;
pub mod survey_sessions;
pub mod usage_cost;

pub use process::{CommandOutput, CommandRunner, CommandSpec, ProcessError, SystemRunner};

use infra::{bootstrap, fleet, instances, stacks};
use std::path::Path;
use std::sync::Arc;
use toolbox_registry::{DiscoveryError, EntryPoints, Registry, discover, typed};

/// Entry points backed by real processes
#[must_use]
pub fn entry_points() -> EntryPoints {
    entry_points_with(Arc::new(SystemRunner))
}

/// Entry points that shell out through `runner`
#[must_use]
pub fn entry_points_with(runner: Arc<dyn CommandRunner>) -> EntryPoints {
    // Binds a runner-taking capability to a clone of `runner`.
    macro_rules! with_runner {
        ($input:ty, $f:path) => {{
            let runner = Arc::clone(&runner);
            typed(move |input: $input| $f(runner.as_ref(), input))
        }};
    }

    EntryPoints::new()
        .with_handler(
            normalize_markdown::NAME,
            typed(normalize_markdown::normalize_markdown),
        )
        .with_handler(usage_cost::NAME, typed(usage_cost::calculate_usage_cost))
        .with_handler(bsport::NAME, with_runner!(bsport::OffersInput, bsport::list_offers))
        .with_handler(
            deploy_compose::NAME,
            with_runner!(deploy_compose::DeployInput, deploy_compose::deploy_compose),
        )
        .with_handler(ghcr_push::NAME, with_runner!(ghcr_push::PushInput, ghcr_push::ghcr_push))
        .with_handler(canvas::NAME, with_runner!(canvas::CanvasInput, canvas::extract_markdown))
        .with_handler(
            create_gist::NAME,
            with_runner!(create_gist::GistInput, create_gist::create_gist),
        )
        .with_handler(
            download_video::NAME,
            with_runner!(download_video::DownloadInput, download_video::download_video),
        )
        .with_handler(
            export_cookies::NAME,
            with_runner!(export_cookies::ExportCookiesInput, export_cookies::export_cookies),
        )
        .with_handler(
            survey_sessions::NAME,
            with_runner!(survey_sessions::SurveyInput, survey_sessions::survey_sessions),
        )
        .with_handler(
            stacks::STATUS_NAME,
            with_runner!(stacks::StackStatusInput, stacks::stack_status),
        )
        .with_handler(
            stacks::CHECK_NAME,
            with_runner!(stacks::CheckStackInput, stacks::check_stack),
        )
        .with_handler(
            stacks::DEPLOY_NAME,
            with_runner!(stacks::DeployStackInput, stacks::deploy_stack),
        )
        .with_handler(
            stacks::DESTROY_NAME,
            with_runner!(stacks::DestroyStackInput, stacks::destroy_stack),
        )
        .with_handler(
            stacks::DISCOVER_NAME,
            with_runner!(stacks::DiscoverStacksInput, stacks::discover_stacks),
        )
        .with_handler(
            instances::LIST_NAME,
            with_runner!(instances::ListInstancesInput, instances::list_instances),
        )
        .with_handler(
            instances::SPAWN_NAME,
            with_runner!(instances::SpawnInstanceInput, instances::spawn_instance),
        )
        .with_handler(
            instances::DESTROY_NAME,
            with_runner!(instances::DestroyInstanceInput, instances::destroy_instance),
        )
        .with_handler(
            instances::CLEANUP_NAME,
            with_runner!(instances::CleanupInput, instances::cleanup_instances),
        )
        .with_handler(
            instances::TEMPLATES_NAME,
            with_runner!(instances::DiscoverTemplatesInput, instances::discover_templates),
        )
        .with_handler(
            bootstrap::NAME,
            with_runner!(bootstrap::BootstrapInput, bootstrap::bootstrap_vm),
        )
        .with_handler(
            fleet::CHECK_NAME,
            with_runner!(fleet::CheckFleetInput, fleet::check_fleet),
        )
        .with_handler(
            fleet::HEALTH_NAME,
            with_runner!(fleet::FleetHealthInput, fleet::fleet_health),
        )
}

/// Discover the plugin tree under `dir` with the default entry points
///
/// # Errors
///
/// Returns error if discovery fails
pub fn default_registry(dir: &Path) -> Result<Registry, DiscoveryError> {
    discover(dir, &entry_points())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeRunner;
    use serde_json::json;
    use std::path::PathBuf;
    use toolbox_registry::{Dispatcher, Surface};

    fn shipped_tree() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../capabilities")
    }

    fn dispatcher_with(runner: FakeRunner) -> Dispatcher {
        let registry = discover(&shipped_tree(), &entry_points_with(Arc::new(runner))).unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    #[test]
    fn test_every_shipped_contract_has_an_entry_point() {
        let registry = default_registry(&shipped_tree()).unwrap();
        let table = entry_points();
        assert_eq!(registry.len(), 23);
        for record in registry.records() {
            assert!(
                table.get(record.entry_point()).is_some(),
                "{} has no entry point",
                record.name()
            );
        }
        assert_eq!(registry.for_surface(Surface::Mcp).count(), 23);
        assert!(!registry.get(fleet::HEALTH_NAME).unwrap().exposes(Surface::Openai));
        assert!(!registry.get(deploy_compose::NAME).unwrap().exposes(Surface::Openai));
        assert!(registry.get(normalize_markdown::NAME).unwrap().exposes(Surface::Openai));
    }

    #[test]
    fn test_normalize_through_dispatch() {
        let dispatcher = dispatcher_with(FakeRunner::empty());
        let envelope = dispatcher.invoke(
            normalize_markdown::NAME,
            json!({"text": "# Title  \nline\t"}),
        );
        assert!(envelope.is_ok(), "{envelope:?}");
        let result = envelope.result().unwrap();
        assert_eq!(result["text"], "# Title\nline\n");
        assert_eq!(
            result["changes"],
            json!(["trim_trailing_whitespace", "ensure_final_newline"])
        );
    }

    #[test]
    fn test_missing_binary_is_dependency_error() {
        let dispatcher = dispatcher_with(FakeRunner::empty());
        let envelope = dispatcher.invoke(
            deploy_compose::NAME,
            json!({"host": "pi@box", "compose_dir": "/srv/app", "dry_run": true}),
        );
        assert_eq!(envelope.error_code(), Some("dependency_error"));
    }

    #[test]
    fn test_dry_run_output_matches_contract() {
        let dispatcher = dispatcher_with(FakeRunner::with_binaries(&["ssh", "docker"]));
        let deploy = dispatcher.invoke(
            deploy_compose::NAME,
            json!({"host": "pi@box", "compose_dir": "/srv/app", "dry_run": true}),
        );
        assert!(deploy.is_ok(), "{deploy:?}");
        let push = dispatcher.invoke(
            ghcr_push::NAME,
            json!({"repo": "acme/api", "context": ".", "dry_run": true}),
        );
        assert!(push.is_ok(), "{push:?}");
    }

    #[test]
    fn test_declared_domain_error_passes_through() {
        let runner = FakeRunner::with_binaries(&["gh"]).respond(1, "", "HTTP 401");
        let dispatcher = dispatcher_with(runner);
        let envelope = dispatcher.invoke(create_gist::NAME, json!({"content": "x"}));
        assert_eq!(envelope.error_code(), Some("gist_error"));
    }

    #[test]
    fn test_invalid_input_rejected_by_schema() {
        let dispatcher = dispatcher_with(FakeRunner::with_binaries(&["docker"]));
        let envelope = dispatcher.invoke(ghcr_push::NAME, json!({"repo": "acme/api"}));
        assert_eq!(envelope.error_code(), Some("validation_error"));
    }

    #[test]
    fn test_usage_cost_through_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("usage.jsonl");
        std::fs::write(
            &log,
            "{\"type\":\"openai_call\",\"kind\":\"audio_transcription\",\"status\":\"ok\",\"model\":\"whisper-1\",\"meta\":{\"audio_seconds\":120}}\n",
        )
        .unwrap();
        let dispatcher = dispatcher_with(FakeRunner::empty());
        let envelope = dispatcher.invoke(
            usage_cost::NAME,
            json!({
                "usage_log_path": log.display().to_string(),
                "pricing": {"audio_models": {"whisper-1": {"per_minute": 0.5}}}
            }),
        );
        assert!(envelope.is_ok(), "{envelope:?}");
        assert_eq!(envelope.result().unwrap()["total_cost"], json!(1.0));
    }

    #[test]
    fn test_infra_dry_run_through_dispatch() {
        let dispatcher = dispatcher_with(FakeRunner::with_binaries(&["docker"]));
        let envelope = dispatcher.invoke(
            stacks::DEPLOY_NAME,
            json!({"stack": "health-ledger", "services": ["api"], "dry_run": true}),
        );
        assert!(envelope.is_ok(), "{envelope:?}");
        let result = envelope.result().unwrap();
        assert_eq!(result["action"], "dry_run");
        assert_eq!(result["compose_dir"], "/opt/health-ledger");

        let unsafe_name = dispatcher.invoke(stacks::DEPLOY_NAME, json!({"stack": "../etc", "dry_run": true}));
        assert_eq!(unsafe_name.error_code(), Some("validation_error"));
    }

    #[test]
    fn test_fleet_report_matches_contract() {
        let runner = FakeRunner::with_binaries(&["curl"])
            .respond(0, "{\"status\":\"ok\"}", "")
            .respond(0, "405", "");
        let dispatcher = dispatcher_with(runner);
        let envelope = dispatcher.invoke(
            fleet::CHECK_NAME,
            json!({
                "scope": "tunnel",
                "fleet": [{
                    "name": "bridge", "compose_dir": "/opt/bridge", "port": 8767,
                    "smoke_tool": "catalog", "hostname": "bridge.example.net"
                }]
            }),
        );
        assert!(envelope.is_ok(), "{envelope:?}");
        let service = &envelope.result().unwrap()["services"][0];
        assert_eq!(service["name"], "bridge");
        assert_eq!(service["tunnel"]["mcp_check"]["status_code"], 405);
        assert_eq!(service["status"], "ok");
    }

    #[test]
    fn test_survey_output_matches_contract() {
        let home = tempfile::tempdir().unwrap();
        let project = home.path().join("projects").join("-root-app");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(
            project.join("abc.jsonl"),
            "{\"type\":\"user\",\"timestamp\":\"2026-01-01T00:00:00Z\",\"message\":{\"content\":\"hi\"}}\n",
        )
        .unwrap();
        let dispatcher = dispatcher_with(FakeRunner::empty());
        let envelope = dispatcher.invoke(
            survey_sessions::NAME,
            json!({"sources": ["cli"], "claude_dir": home.path().display().to_string()}),
        );
        assert!(envelope.is_ok(), "{envelope:?}");
        assert_eq!(envelope.result().unwrap()["summary"]["cli"], 1);
    }
}
