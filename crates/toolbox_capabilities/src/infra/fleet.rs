//! Fleet health: container state, `/health`, an MCP smoke call and the
//! public tunnel for each MCP service.
//!
//! `infra.check_fleet` runs the local checks on this machine;
//! `infra.fleet_health` runs them on the fleet host over ssh. Tunnel checks
//! always run here. A failed check degrades the report instead of failing the
//! call; only missing binaries are errors.

use super::{InfraError, Target, clip, first_present, parse_compose_ps, quote, text_of};
use crate::process::{self, CommandOutput, CommandRunner, CommandSpec};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Local check capability name
pub const CHECK_NAME: &str = "infra.check_fleet";
/// Remote check capability name
pub const HEALTH_NAME: &str = "infra.fleet_health";

/// Fleet host used by `infra.fleet_health` when none is given
pub const DEFAULT_FLEET_HOST: &str = "ubuntu@matthews-oracle-instance";

const ERROR_PREVIEW: usize = 200;
const RESULT_PREVIEW: usize = 300;

/// How a service speaks MCP over HTTP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum McpTransport {
    /// MCP SDK transport: initialize, initialized, then SSE responses
    StreamableHttp,
    /// Plain JSON-RPC POST
    #[default]
    CustomHttp,
}

/// One service in the fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetService {
    /// Service name
    pub name: String,
    /// Compose directory on the fleet host
    pub compose_dir: String,
    /// Port of the local HTTP listener
    pub port: u16,
    /// Tool called by the smoke test
    pub smoke_tool: String,
    /// Smoke test arguments
    #[serde(default = "empty_object")]
    pub smoke_args: Value,
    /// Public tunnel hostname
    pub hostname: String,
    /// MCP transport
    #[serde(default)]
    pub mcp_transport: McpTransport,
}

fn empty_object() -> Value {
    json!({})
}

/// Services checked when the input names no fleet
#[must_use]
pub fn default_fleet() -> Vec<FleetService> {
    let service = |name: &str, port, tool: &str, args: Value, hostname: &str, transport| FleetService {
        name: name.to_string(),
        compose_dir: format!("/opt/{name}"),
        port,
        smoke_tool: tool.to_string(),
        smoke_args: args,
        hostname: hostname.to_string(),
        mcp_transport: transport,
    };
    vec![
        service(
            "remarkable-pipeline",
            8766,
            "remarkable_status",
            json!({"detail": "summary"}),
            "remarkable-pipeline-mcp.matthewdart.name",
            McpTransport::StreamableHttp,
        ),
        service(
            "health-ledger",
            8765,
            "list_assets",
            json!({}),
            "health-ledger.matthewdart.name",
            McpTransport::StreamableHttp,
        ),
        service(
            "archi-mcp-bridge",
            8767,
            "jarchi_catalog",
            json!({}),
            "archi-mcp-bridge.matthewdart.name",
            McpTransport::CustomHttp,
        ),
    ]
}

/// Which surfaces to check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Containers, `/health` and smoke test
    Local,
    /// Public tunnel only
    Tunnel,
    /// Both
    #[default]
    Full,
}

impl Scope {
    fn local(self) -> bool {
        matches!(self, Self::Local | Self::Full)
    }

    fn tunnel(self) -> bool {
        matches!(self, Self::Tunnel | Self::Full)
    }
}

/// Input for `infra.check_fleet`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckFleetInput {
    /// Surfaces to check
    #[serde(default)]
    pub scope: Scope,
    /// Only these services; all when empty
    #[serde(default)]
    pub services: Vec<String>,
    /// Fleet to check instead of the built-in one
    #[serde(default)]
    pub fleet: Option<Vec<FleetService>>,
}

/// Input for `infra.fleet_health`
#[derive(Debug, Clone, Deserialize)]
pub struct FleetHealthInput {
    /// Surfaces to check
    #[serde(default)]
    pub scope: Scope,
    /// SSH destination for local checks
    #[serde(default = "default_fleet_host")]
    pub host: String,
    /// Only these services; all when empty
    #[serde(default)]
    pub services: Vec<String>,
    /// Fleet to check instead of the built-in one
    #[serde(default)]
    pub fleet: Option<Vec<FleetService>>,
}

fn default_fleet_host() -> String {
    DEFAULT_FLEET_HOST.to_string()
}

/// Service or fleet verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Every check passed
    Ok,
    /// Reachable but something failed
    Degraded,
    /// Down
    Error,
}

/// `docker compose ps` summary
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ContainerCheck {
    /// Any container running
    pub running: bool,
    /// First reported health, `unknown` without one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    /// Containers listed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_count: Option<usize>,
    /// Why the listing failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `/health` on the local listener
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthEndpoint {
    /// Reported status, or `unreachable`
    pub status: String,
    /// 200 when the endpoint answered
    pub http_status: Option<u16>,
    /// Reported sub-checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<Value>,
    /// Body preview when it is not JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// Why the request failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// MCP `tools/call` against the local listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmokeTest {
    /// Tool called
    pub tool: String,
    /// Call returned a result
    pub ok: bool,
    /// Response preview
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_preview: Option<String>,
    /// Why the call failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Local checks, stopping at the first critical failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalChecks {
    /// Container state
    pub container: ContainerCheck,
    /// `/health`, when a container runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_endpoint: Option<HealthEndpoint>,
    /// Smoke test, unless `/health` reported `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoke_test: Option<SmokeTest>,
}

/// One request through the public tunnel
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TunnelCheck {
    /// Tunnel answered
    pub ok: bool,
    /// HTTP status, when known
    pub status_code: Option<u16>,
    /// Reported health status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Body preview when it is not JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// Why the request failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tunnel checks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelChecks {
    /// `https://<hostname>/health`
    pub health_check: TunnelCheck,
    /// Any HTTP answer from `https://<hostname>/mcp`
    pub mcp_check: TunnelCheck,
}

/// Per-service report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceReport {
    /// Service name
    pub name: String,
    /// Local checks, unless scope is `tunnel`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalChecks>,
    /// Tunnel checks, unless scope is `local`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelChecks>,
    /// Verdict
    pub status: Health,
}

/// Output of both fleet capabilities
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetReport {
    /// Worst service verdict
    pub fleet_status: Health,
    /// RFC 3339 UTC timestamp
    pub checked_at: String,
    /// Surfaces checked
    pub scope: Scope,
    /// Services in fleet order
    pub services: Vec<ServiceReport>,
}

/// Service verdict from its checks
///
/// A stopped container or an unreachable or failing `/health` is an error;
/// a degraded `/health`, failed smoke test or failed tunnel request degrades.
#[must_use]
pub fn service_status(local: Option<&LocalChecks>, tunnel: Option<&TunnelChecks>) -> Health {
    let mut status = Health::Ok;
    if let Some(local) = local {
        if !local.container.running {
            return Health::Error;
        }
        let reported = local.health_endpoint.as_ref().map_or("unknown", |h| h.status.as_str());
        if matches!(reported, "error" | "unreachable") {
            return Health::Error;
        }
        if reported == "degraded" || local.smoke_test.as_ref().is_some_and(|s| !s.ok) {
            status = Health::Degraded;
        }
    }
    if let Some(tunnel) = tunnel {
        if !tunnel.health_check.ok || !tunnel.mcp_check.ok {
            status = Health::Degraded;
        }
    }
    status
}

/// Worst of the service verdicts
#[must_use]
pub fn fleet_status(services: &[ServiceReport]) -> Health {
    services.iter().map(|s| s.status).max().unwrap_or(Health::Ok)
}

fn run_quietly(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<CommandOutput, String> {
    process::run(runner, spec).map_err(|e| clip(&e.to_string(), ERROR_PREVIEW))
}

fn stderr_preview(output: &CommandOutput) -> String {
    clip(output.stderr.trim(), ERROR_PREVIEW)
}

fn tools_call(id: u64, service: &FleetService) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": service.smoke_tool, "arguments": service.smoke_args},
    })
}

/// Shell script running one MCP streamable HTTP session
///
/// Prints the first SSE `data:` payload of the `tools/call` response, or a
/// `{"ok":false,"error":...}` object.
#[must_use]
pub fn session_script(service: &FleetService) -> String {
    let initialize = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "fleet-health", "version": "0.1"},
        },
    });
    let initialized = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
    format!(
        r#"set -e
BASE="http://localhost:{port}/mcp"
CT="Content-Type: application/json"
AC="Accept: application/json, text/event-stream"
SID=$(curl -sS --max-time 10 -D - -o /dev/null -X POST -H "$CT" -H "$AC" -d {initialize} "$BASE" 2>/dev/null \
  | grep -i '^mcp-session-id:' | head -1 | sed 's/^[^:]*: *//' | tr -d '\r\n' || true)
if [ -z "$SID" ]; then
  echo '{{"ok":false,"error":"no session id from initialize"}}'
  exit 0
fi
curl -sS --max-time 5 -X POST -H "$CT" -H "$AC" -H "Mcp-Session-Id: $SID" -d {initialized} "$BASE" >/dev/null 2>&1 || true
RESULT=$(curl -sS -N --max-time 15 -X POST -H "$CT" -H "$AC" -H "Mcp-Session-Id: $SID" -d {call} "$BASE" 2>/dev/null \
  | grep '^data: ' | head -1 | sed 's/^data: //' || true)
if [ -n "$RESULT" ]; then
  echo "$RESULT"
else
  echo '{{"ok":false,"error":"no data in SSE response"}}'
fi
"#,
        port = service.port,
        initialize = quote(&initialize.to_string()),
        initialized = quote(&initialized.to_string()),
        call = quote(&tools_call(2, service).to_string()),
    )
}

/// Interpret the output of [`session_script`]
#[must_use]
pub fn streamable_smoke(tool: &str, output: &CommandOutput) -> SmokeTest {
    let failed = |error: String| SmokeTest {
        tool: tool.to_string(),
        ok: false,
        result_preview: None,
        error: Some(error),
    };
    let body = output.stdout.trim();
    if !output.success() || body.is_empty() {
        let reason = if output.stderr.trim().is_empty() {
            "empty response".to_string()
        } else {
            stderr_preview(output)
        };
        return failed(reason);
    }
    match serde_json::from_str::<Value>(body) {
        Ok(reply) => {
            if reply.get("ok") == Some(&Value::Bool(false)) {
                if let Some(error) = reply.get("error") {
                    return failed(clip(&text_of(error), ERROR_PREVIEW));
                }
            }
            SmokeTest {
                tool: tool.to_string(),
                ok: reply.get("result").is_some(),
                result_preview: Some(clip(body, RESULT_PREVIEW)),
                error: None,
            }
        }
        Err(_) => failed(format!("bad json: {}", clip(body, ERROR_PREVIEW))),
    }
}

/// Interpret a plain JSON-RPC response body
#[must_use]
pub fn plain_smoke(tool: &str, output: &CommandOutput) -> SmokeTest {
    if !output.success() {
        return SmokeTest {
            tool: tool.to_string(),
            ok: false,
            result_preview: None,
            error: Some(stderr_preview(output)),
        };
    }
    let ok = output.stdout.contains("result") && !clip(&output.stdout, 100).contains("error");
    SmokeTest {
        tool: tool.to_string(),
        ok,
        result_preview: Some(clip(&output.stdout, if ok { RESULT_PREVIEW } else { ERROR_PREVIEW })),
        error: None,
    }
}

struct FleetChecker<'a> {
    runner: &'a dyn CommandRunner,
    target: Target,
}

impl FleetChecker<'_> {
    fn container(&self, service: &FleetService) -> ContainerCheck {
        let script = format!("cd {} && docker compose ps --format json", quote(&service.compose_dir));
        let output = match run_quietly(self.runner, &self.target.command(&script)) {
            Ok(output) if output.success() => output,
            Ok(output) => {
                return ContainerCheck {
                    error: Some(stderr_preview(&output)),
                    ..ContainerCheck::default()
                };
            }
            Err(error) => {
                return ContainerCheck {
                    error: Some(error),
                    ..ContainerCheck::default()
                };
            }
        };

        let containers = parse_compose_ps(&output.stdout);
        let running = containers.iter().any(|c| {
            let state = c.get("State").and_then(Value::as_str).unwrap_or_default();
            let status = c.get("Status").and_then(Value::as_str).unwrap_or_default();
            state.eq_ignore_ascii_case("running") || status.starts_with("Up")
        });
        let health = containers
            .iter()
            .find_map(|c| first_present(c, &["Health", "health"]))
            .map_or_else(|| "unknown".to_string(), text_of);
        ContainerCheck {
            running,
            health: Some(health),
            container_count: Some(containers.len()),
            error: None,
        }
    }

    fn health_endpoint(&self, service: &FleetService) -> HealthEndpoint {
        let unreachable = |error: String| HealthEndpoint {
            status: "unreachable".to_string(),
            http_status: None,
            checks: None,
            raw: None,
            error: Some(error),
        };
        let script = format!("curl -fsS --max-time 10 http://localhost:{}/health", service.port);
        let output = match run_quietly(self.runner, &self.target.command(&script)) {
            Ok(output) if output.success() => output,
            Ok(output) => return unreachable(stderr_preview(&output)),
            Err(error) => return unreachable(error),
        };
        match serde_json::from_str::<Value>(&output.stdout) {
            Ok(body) => HealthEndpoint {
                status: body.get("status").map_or_else(|| "unknown".to_string(), text_of),
                http_status: Some(200),
                checks: Some(body.get("checks").cloned().unwrap_or_else(empty_object)),
                raw: None,
                error: None,
            },
            Err(_) => HealthEndpoint {
                status: "unknown".to_string(),
                http_status: Some(200),
                checks: None,
                raw: Some(clip(&output.stdout, ERROR_PREVIEW)),
                error: None,
            },
        }
    }

    fn smoke_test(&self, service: &FleetService) -> SmokeTest {
        let (script, interpret): (String, fn(&str, &CommandOutput) -> SmokeTest) = match service.mcp_transport {
            McpTransport::StreamableHttp => (session_script(service), streamable_smoke),
            McpTransport::CustomHttp => (
                format!(
                    "curl -fsS --max-time 15 -H 'Content-Type: application/json' -X POST -d {} http://localhost:{}/mcp",
                    quote(&tools_call(1, service).to_string()),
                    service.port
                ),
                plain_smoke,
            ),
        };
        match run_quietly(self.runner, &self.target.command(&script)) {
            Ok(output) => interpret(&service.smoke_tool, &output),
            Err(error) => SmokeTest {
                tool: service.smoke_tool.clone(),
                ok: false,
                result_preview: None,
                error: Some(error),
            },
        }
    }

    fn local(&self, service: &FleetService) -> LocalChecks {
        let container = self.container(service);
        if !container.running {
            return LocalChecks {
                container,
                health_endpoint: None,
                smoke_test: None,
            };
        }
        let health = self.health_endpoint(service);
        let smoke_test = (health.status != "error").then(|| self.smoke_test(service));
        LocalChecks {
            container,
            health_endpoint: Some(health),
            smoke_test,
        }
    }

    fn tunnel_health(&self, service: &FleetService) -> TunnelCheck {
        let spec = CommandSpec::new("curl")
            .args(["-fsS", "--max-time", "10"])
            .arg(format!("https://{}/health", service.hostname));
        let output = match run_quietly(self.runner, &spec) {
            Ok(output) if output.success() => output,
            Ok(output) => {
                return TunnelCheck {
                    error: Some(stderr_preview(&output)),
                    ..TunnelCheck::default()
                };
            }
            Err(error) => {
                return TunnelCheck {
                    error: Some(error),
                    ..TunnelCheck::default()
                };
            }
        };
        let (status, raw) = match serde_json::from_str::<Value>(&output.stdout) {
            Ok(body) => (
                Some(body.get("status").map_or_else(|| "unknown".to_string(), text_of)),
                None,
            ),
            Err(_) => (None, Some(clip(&output.stdout, ERROR_PREVIEW))),
        };
        TunnelCheck {
            ok: true,
            status_code: Some(200),
            status,
            raw,
            error: None,
        }
    }

    fn tunnel_mcp(&self, service: &FleetService) -> TunnelCheck {
        let spec = CommandSpec::new("curl")
            .args([
                "-sS",
                "--max-time",
                "10",
                "-X",
                "POST",
                "-H",
                "Content-Type: application/json",
                "-H",
                "Accept: application/json, text/event-stream",
                "-d",
                "{}",
                "-o",
                "/dev/null",
                "-w",
                "%{http_code}",
            ])
            .arg(format!("https://{}/mcp", service.hostname));
        match run_quietly(self.runner, &spec) {
            Ok(output) => {
                let code = output.stdout.trim().parse::<u16>().unwrap_or(0);
                TunnelCheck {
                    ok: code > 0,
                    status_code: Some(code),
                    ..TunnelCheck::default()
                }
            }
            Err(error) => TunnelCheck {
                error: Some(error),
                ..TunnelCheck::default()
            },
        }
    }

    fn check(&self, scope: Scope, service: &FleetService) -> ServiceReport {
        let local = scope.local().then(|| self.local(service));
        let tunnel = scope.tunnel().then(|| TunnelChecks {
            health_check: self.tunnel_health(service),
            mcp_check: self.tunnel_mcp(service),
        });
        let status = service_status(local.as_ref(), tunnel.as_ref());
        tracing::debug!(service = %service.name, ?status, "service checked");
        ServiceReport {
            name: service.name.clone(),
            local,
            tunnel,
            status,
        }
    }

    fn report(&self, scope: Scope, fleet: Option<Vec<FleetService>>, only: &[String]) -> FleetReport {
        let services: Vec<ServiceReport> = fleet
            .unwrap_or_else(default_fleet)
            .iter()
            .filter(|s| only.is_empty() || only.contains(&s.name))
            .map(|s| self.check(scope, s))
            .collect();
        let fleet_status = fleet_status(&services);
        tracing::info!(host = self.target.host(), ?fleet_status, "fleet checked");
        FleetReport {
            fleet_status,
            checked_at: Utc::now().to_rfc3339(),
            scope,
            services,
        }
    }
}

/// Check the fleet from the host it runs on
///
/// # Errors
///
/// Returns `dependency_error` without curl, or without docker when the scope
/// includes local checks
pub fn check_fleet(runner: &dyn CommandRunner, input: CheckFleetInput) -> Result<FleetReport, InfraError> {
    if input.scope.local() {
        process::require(runner, "docker")?;
    }
    process::require(runner, "curl")?;
    let checker = FleetChecker {
        runner,
        target: Target::Local,
    };
    Ok(checker.report(input.scope, input.fleet, &input.services))
}

/// Check the fleet remotely, running local checks over ssh
///
/// # Errors
///
/// Returns `dependency_error` without curl, or without ssh when the scope
/// includes local checks
pub fn fleet_health(runner: &dyn CommandRunner, input: FleetHealthInput) -> Result<FleetReport, InfraError> {
    if input.scope.local() {
        process::require(runner, "ssh")?;
    }
    process::require(runner, "curl")?;
    let checker = FleetChecker {
        runner,
        target: Target::Remote(input.host),
    };
    Ok(checker.report(input.scope, input.fleet, &input.services))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeRunner;
    use toolbox_core::DomainError;

    fn bridge() -> FleetService {
        FleetService {
            name: "bridge".to_string(),
            compose_dir: "/opt/bridge".to_string(),
            port: 8767,
            smoke_tool: "catalog".to_string(),
            smoke_args: json!({}),
            hostname: "bridge.example.net".to_string(),
            mcp_transport: McpTransport::CustomHttp,
        }
    }

    fn output(status: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            status: Some(status),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }

    fn running_local(health: &str, smoke_ok: bool) -> LocalChecks {
        LocalChecks {
            container: ContainerCheck {
                running: true,
                ..ContainerCheck::default()
            },
            health_endpoint: Some(HealthEndpoint {
                status: health.to_string(),
                http_status: Some(200),
                checks: None,
                raw: None,
                error: None,
            }),
            smoke_test: Some(SmokeTest {
                tool: "t".to_string(),
                ok: smoke_ok,
                result_preview: None,
                error: None,
            }),
        }
    }

    #[test]
    fn test_service_status_rules() {
        let stopped = LocalChecks {
            container: ContainerCheck::default(),
            health_endpoint: None,
            smoke_test: None,
        };
        assert_eq!(service_status(Some(&stopped), None), Health::Error);
        assert_eq!(service_status(Some(&running_local("unreachable", true)), None), Health::Error);
        assert_eq!(service_status(Some(&running_local("degraded", true)), None), Health::Degraded);
        assert_eq!(service_status(Some(&running_local("ok", false)), None), Health::Degraded);
        assert_eq!(service_status(Some(&running_local("ok", true)), None), Health::Ok);

        let tunnel = TunnelChecks {
            health_check: TunnelCheck {
                ok: true,
                ..TunnelCheck::default()
            },
            mcp_check: TunnelCheck::default(),
        };
        assert_eq!(service_status(None, Some(&tunnel)), Health::Degraded);
        assert_eq!(service_status(None, None), Health::Ok);
    }

    #[test]
    fn test_fleet_status_is_worst() {
        let report = |status| ServiceReport {
            name: "s".to_string(),
            local: None,
            tunnel: None,
            status,
        };
        assert_eq!(fleet_status(&[]), Health::Ok);
        assert_eq!(fleet_status(&[report(Health::Ok), report(Health::Degraded)]), Health::Degraded);
        assert_eq!(fleet_status(&[report(Health::Error), report(Health::Degraded)]), Health::Error);
    }

    #[test]
    fn test_plain_smoke() {
        let ok = plain_smoke("t", &output(0, r#"{"jsonrpc":"2.0","id":1,"result":{"content":[]}}"#, ""));
        assert!(ok.ok);
        let rpc_error = plain_smoke("t", &output(0, r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601}}"#, ""));
        assert!(!rpc_error.ok);
        let refused = plain_smoke("t", &output(7, "", "curl: (7) Failed to connect\n"));
        assert_eq!(refused.error.as_deref(), Some("curl: (7) Failed to connect"));
    }

    #[test]
    fn test_streamable_smoke() {
        let ok = streamable_smoke("t", &output(0, "{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n", ""));
        assert!(ok.ok);
        assert!(ok.result_preview.is_some());
        let no_session = streamable_smoke("t", &output(0, r#"{"ok":false,"error":"no session id from initialize"}"#, ""));
        assert_eq!(no_session.error.as_deref(), Some("no session id from initialize"));
        assert_eq!(streamable_smoke("t", &output(0, "", "")).error.as_deref(), Some("empty response"));
        assert!(streamable_smoke("t", &output(0, "<html>", "")).error.unwrap().starts_with("bad json: "));
    }

    #[test]
    fn test_session_script_quotes_payloads() {
        let mut service = bridge();
        service.smoke_args = json!({"note": "it's"});
        let script = session_script(&service);
        assert!(script.contains("BASE=\"http://localhost:8767/mcp\""));
        assert!(script.contains("'{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}'"));
        assert!(script.contains("it'\\''s"));
        assert!(script.contains("echo '{\"ok\":false,\"error\":\"no session id from initialize\"}'"));
    }

    #[test]
    fn test_check_fleet_local_all_ok() {
        let runner = FakeRunner::with_binaries(&["docker", "curl"])
            .respond(0, "{\"Name\":\"bridge-1\",\"State\":\"running\",\"Health\":\"healthy\"}\n", "")
            .respond(0, r#"{"status":"ok","checks":{"db":"ok"}}"#, "")
            .respond(0, r#"{"jsonrpc":"2.0","id":1,"result":{}}"#, "");
        let report = check_fleet(
            &runner,
            CheckFleetInput {
                scope: Scope::Local,
                services: Vec::new(),
                fleet: Some(vec![bridge()]),
            },
        )
        .unwrap();
        assert_eq!(report.fleet_status, Health::Ok);
        let local = report.services[0].local.as_ref().unwrap();
        assert_eq!(local.container.health.as_deref(), Some("healthy"));
        assert_eq!(local.health_endpoint.as_ref().unwrap().checks, Some(json!({"db": "ok"})));

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.program == "sh"));
        assert_eq!(calls[0].args[1], "cd /opt/bridge && docker compose ps --format json");
        assert!(calls[2].args[1].ends_with("http://localhost:8767/mcp"));

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["scope"], "local");
        assert!(value["services"][0].get("tunnel").is_none());
    }

    #[test]
    fn test_stopped_container_short_circuits() {
        let runner = FakeRunner::with_binaries(&["docker", "curl"])
            .respond(0, "{\"Name\":\"bridge-1\",\"State\":\"exited\"}\n", "");
        let report = check_fleet(
            &runner,
            CheckFleetInput {
                scope: Scope::Local,
                services: Vec::new(),
                fleet: Some(vec![bridge()]),
            },
        )
        .unwrap();
        assert_eq!(report.fleet_status, Health::Error);
        assert!(report.services[0].local.as_ref().unwrap().health_endpoint.is_none());
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_fleet_health_tunnel_only_needs_curl() {
        let runner = FakeRunner::with_binaries(&["curl"])
            .respond(22, "", "curl: (22) The requested URL returned error: 502\n")
            .respond(0, "405", "");
        let input: FleetHealthInput =
            serde_json::from_value(json!({"scope": "tunnel", "services": ["health-ledger"]})).unwrap();
        let report = fleet_health(&runner, input).unwrap();
        assert_eq!(report.services.len(), 1);
        assert_eq!(report.services[0].name, "health-ledger");
        assert_eq!(report.fleet_status, Health::Degraded);

        let tunnel = report.services[0].tunnel.as_ref().unwrap();
        assert!(!tunnel.health_check.ok);
        assert_eq!(tunnel.mcp_check.status_code, Some(405));

        let calls = runner.calls();
        assert_eq!(calls[0].argv().last().unwrap(), "https://health-ledger.matthewdart.name/health");
        assert_eq!(calls[1].argv().last().unwrap(), "https://health-ledger.matthewdart.name/mcp");
    }

    #[test]
    fn test_fleet_health_runs_local_checks_over_ssh() {
        let runner = FakeRunner::with_binaries(&["ssh", "curl"]).respond(255, "", "ssh: connect to host vm: timed out\n");
        let input: FleetHealthInput = serde_json::from_value(json!({
            "scope": "local",
            "host": "ubuntu@vm",
            "fleet": [{"name": "bridge", "compose_dir": "/opt/bridge", "port": 8767, "smoke_tool": "catalog", "hostname": "b.example.net"}]
        }))
        .unwrap();
        let report = fleet_health(&runner, input).unwrap();
        let container = &report.services[0].local.as_ref().unwrap().container;
        assert_eq!(container.error.as_deref(), Some("ssh: connect to host vm: timed out"));
        assert_eq!(report.fleet_status, Health::Error);
        assert_eq!(runner.calls()[0].program, "ssh");
    }

    #[test]
    fn test_fleet_health_requires_ssh_for_local_scope() {
        let err = fleet_health(
            &FakeRunner::with_binaries(&["curl"]),
            serde_json::from_value(json!({})).unwrap(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "dependency_error");
    }

    #[test]
    fn test_default_fleet() {
        let fleet = default_fleet();
        assert_eq!(fleet.len(), 3);
        assert_eq!(fleet[0].compose_dir, "/opt/remarkable-pipeline");
        assert_eq!(fleet[2].mcp_transport, McpTransport::CustomHttp);
    }
}
