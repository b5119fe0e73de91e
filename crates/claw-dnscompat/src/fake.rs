//! A simulated cluster runtime for unit tests.
//!
//! [`FakeCluster`] answers the `k3d`, `docker`, `kubectl` and mesh CLI
//! invocations the harness makes, keeping just enough state (fixtures, the
//! DNS image, rollouts, pods) to drive every path of the case state machine.
//! Detached starts spawn a real `sh` so process handles behave for real.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;

use claw_exec::{CommandRunner, CommandSpec, ExecError, Outcome, ProcessHandle, ProcessRunner, Result};
use parking_lot::Mutex;
use serde_json::{Value, json};

const KUBECONFIG_DIR: &str = "/tmp/k3d-fake";
const RESOLVED_ADDRESS: &str = "10.43.12.7";

#[derive(Debug)]
struct FakeDeployment {
    namespace: String,
    name: String,
    container: String,
    label: (String, String),
    image: String,
    previous: Option<String>,
    rollout_remaining: u32,
    unready_polls: u32,
}

impl FakeDeployment {
    fn new(namespace: &str, name: &str, label: (&str, &str), image: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            container: name.to_string(),
            label: (label.0.to_string(), label.1.to_string()),
            image: image.to_string(),
            previous: None,
            rollout_remaining: 0,
            unready_polls: 0,
        }
    }

    fn to_json(&self) -> Value {
        let mut labels = serde_json::Map::new();
        labels.insert(self.label.0.clone(), json!(self.label.1));
        json!({
            "metadata": { "name": self.name, "namespace": self.namespace },
            "spec": {
                "selector": { "matchLabels": labels },
                "template": {
                    "spec": { "containers": [{ "name": self.container, "image": self.image }] }
                }
            }
        })
    }

    fn pod_json(&self, suffix: &str, image: &str, ready: bool, terminating: bool) -> Value {
        let mut metadata = json!({
            "name": format!("{}-{suffix}", self.name),
            "namespace": self.namespace,
        });
        if terminating {
            metadata["deletionTimestamp"] = json!("2020-06-01T12:00:00Z");
        }
        let (phase, condition) = if ready { ("Running", "True") } else { ("Pending", "False") };
        json!({
            "metadata": metadata,
            "spec": { "containers": [{ "name": self.container, "image": image }] },
            "status": {
                "phase": phase,
                "conditions": [{ "type": "Ready", "status": condition }]
            }
        })
    }

    /// Current pods; each listing advances the simulated rollout by one step.
    fn list_pods(&mut self, unpullable: &HashSet<String>) -> Vec<Value> {
        let pull_fails = unpullable.contains(&self.image);
        let mut pods = Vec::new();

        if let Some(previous) = &self.previous {
            pods.push(self.pod_json("5b8f1", previous, true, false));
        }
        let ready = self.unready_polls == 0 && self.rollout_remaining == 0 && !pull_fails;
        pods.push(self.pod_json("7d9c4", &self.image, ready, false));

        self.unready_polls = self.unready_polls.saturating_sub(1);
        self.rollout_remaining = self.rollout_remaining.saturating_sub(1);
        if self.rollout_remaining == 0 && !pull_fails {
            self.previous = None;
        }
        pods
    }
}

#[derive(Debug)]
struct State {
    log: Vec<String>,
    cluster: bool,
    fail_create: bool,
    local_images: HashSet<String>,
    unpullable: HashSet<String>,
    imported: Vec<String>,
    applied: BTreeSet<String>,
    fixture_events: Vec<(bool, String)>,
    fail_apply: HashSet<String>,
    fail_delete: HashSet<String>,
    deployments: HashMap<String, FakeDeployment>,
    rollout_polls: u32,
    rejected_versions: HashSet<String>,
    unresolvable_versions: HashSet<String>,
    empty_answers: u32,
    fail_exec: bool,
    controller_crashes: bool,
    controller_starts: u32,
    prepare_kubeconfig: Vec<Option<String>>,
}

impl Default for State {
    fn default() -> Self {
        let deployments = [
            FakeDeployment {
                container: "coredns".to_string(),
                ..FakeDeployment::new("kube-system", "coredns", ("k8s-app", "kube-dns"), "coredns/coredns:1.6.9")
            },
            FakeDeployment::new("whoami", "whoami", ("app", "whoami"), "containous/whoami:v1.0.1"),
            FakeDeployment::new("maesh", "tiny-tools", ("app", "tiny-tools"), "giantswarm/tiny-tools:3.9"),
        ]
        .into_iter()
        .map(|d| (format!("{}/{}", d.namespace, d.name), d))
        .collect();

        Self {
            log: Vec::new(),
            cluster: false,
            fail_create: false,
            local_images: HashSet::new(),
            unpullable: HashSet::new(),
            imported: Vec::new(),
            applied: BTreeSet::new(),
            fixture_events: Vec::new(),
            fail_apply: HashSet::new(),
            fail_delete: HashSet::new(),
            deployments,
            rollout_polls: 1,
            rejected_versions: HashSet::from(["1.2.6".to_string()]),
            unresolvable_versions: HashSet::new(),
            empty_answers: 0,
            fail_exec: false,
            controller_crashes: false,
            controller_starts: 0,
            prepare_kubeconfig: Vec::new(),
        }
    }
}

impl State {
    fn dns_version(&self) -> String {
        self.deployments
            .get("kube-system/coredns")
            .and_then(|d| d.image.rsplit_once(':'))
            .map(|(_, tag)| tag.to_string())
            .unwrap_or_default()
    }
}

/// A simulated cluster runtime, cluster API and mesh CLI.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn ok(output: impl Into<String>) -> Result<Outcome> {
    Ok(Outcome::success(output))
}

fn fail(output: impl Into<String>) -> Result<Outcome> {
    Ok(Outcome::failure(1, output))
}

fn arg(args: &[String], i: usize) -> &str {
    args.get(i).map_or("", String::as_str)
}

fn program_name(spec: &CommandSpec) -> &str {
    spec.program().rsplit('/').next().unwrap_or_default()
}

fn not_found(spec: &CommandSpec) -> ExecError {
    ExecError::launch(
        spec.description(),
        io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
    )
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local_image(&self, image: &str) {
        self.state.lock().local_images.insert(image.to_string());
    }

    /// `docker pull` fails for `image`, and pods using it never start.
    pub fn make_unpullable(&self, image: &str) {
        self.state.lock().unpullable.insert(image.to_string());
    }

    pub fn fail_cluster_create(&self) {
        self.state.lock().fail_create = true;
    }

    pub fn fail_apply(&self, path: &str) {
        self.state.lock().fail_apply.insert(path.to_string());
    }

    pub fn fail_delete(&self, path: &str) {
        self.state.lock().fail_delete.insert(path.to_string());
    }

    pub fn fail_exec(&self) {
        self.state.lock().fail_exec = true;
    }

    /// Keep the pods of `namespace/name` unready for `polls` listings.
    pub fn delay_readiness(&self, key: &str, polls: u32) {
        if let Some(d) = self.state.lock().deployments.get_mut(key) {
            d.unready_polls = polls;
        }
    }

    /// Number of listings a rollout stays mid-flight.
    pub fn set_rollout_polls(&self, polls: u32) {
        self.state.lock().rollout_polls = polls;
    }

    /// `prepare` fails while the DNS service runs `version`.
    pub fn reject_version(&self, version: &str) {
        self.state.lock().rejected_versions.insert(version.to_string());
    }

    /// `prepare` succeeds for every version.
    pub fn accept_all_versions(&self) {
        self.state.lock().rejected_versions.clear();
    }

    /// Mesh names get no answer while the DNS service runs `version`.
    pub fn unresolvable_version(&self, version: &str) {
        self.state.lock().unresolvable_versions.insert(version.to_string());
    }

    /// The next `n` queries return an empty answer.
    pub fn empty_answers(&self, n: u32) {
        self.state.lock().empty_answers = n;
    }

    /// The resident controller exits with an error right after starting.
    pub fn crash_controller(&self) {
        self.state.lock().controller_crashes = true;
    }

    pub fn controller_starts(&self) -> u32 {
        self.state.lock().controller_starts
    }

    pub fn cluster_exists(&self) -> bool {
        self.state.lock().cluster
    }

    pub fn imported_images(&self) -> Vec<String> {
        self.state.lock().imported.clone()
    }

    pub fn is_applied(&self, path: &str) -> bool {
        self.state.lock().applied.contains(path)
    }

    pub fn applied(&self) -> Vec<String> {
        self.state.lock().applied.iter().cloned().collect()
    }

    pub fn dns_version(&self) -> String {
        self.state.lock().dns_version()
    }

    /// `KUBECONFIG` as seen by each `prepare` invocation.
    pub fn prepare_kubeconfigs(&self) -> Vec<Option<String>> {
        self.state.lock().prepare_kubeconfig.clone()
    }

    /// Every invocation so far, `--kubeconfig` stripped.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|l| l.starts_with(prefix))
            .count()
    }

    /// Largest number of `tracked` fixtures ever applied at the same time.
    pub fn max_concurrently_applied(&self, tracked: &[&str]) -> usize {
        let state = self.state.lock();
        let mut live = HashSet::new();
        let mut max = 0;
        for (applied, path) in &state.fixture_events {
            if !tracked.contains(&path.as_str()) {
                continue;
            }
            if *applied {
                live.insert(path.as_str());
            } else {
                live.remove(path.as_str());
            }
            max = max.max(live.len());
        }
        max
    }

    fn k3d(state: &mut State, args: &[String]) -> Result<Outcome> {
        match (arg(args, 0), arg(args, 1)) {
            ("cluster", "create") if state.fail_create => {
                fail("FATA[0002] Failed to create cluster: port 6443 already allocated")
            }
            ("cluster", "create") => {
                state.cluster = true;
                ok(format!("INFO[0030] Cluster '{}' created successfully!\n", arg(args, 2)))
            }
            ("kubeconfig", "write") => ok(format!("{KUBECONFIG_DIR}/kubeconfig-{}.yaml\n", arg(args, 2))),
            ("image", "import") => {
                state.imported.push(arg(args, 2).to_string());
                ok("INFO[0003] Successfully imported image(s)\n")
            }
            ("cluster", "delete") => {
                state.cluster = false;
                ok(format!("INFO[0001] Successfully deleted cluster {}\n", arg(args, 2)))
            }
            _ => fail("unknown k3d command"),
        }
    }

    fn docker(state: &mut State, args: &[String]) -> Result<Outcome> {
        match arg(args, 0) {
            "image" if state.local_images.contains(arg(args, 2)) => ok("[{}]\n"),
            "image" => fail(format!("Error: No such image: {}\n", arg(args, 2))),
            "pull" if state.unpullable.contains(arg(args, 1)) => {
                fail(format!("Error response from daemon: manifest for {} not found\n", arg(args, 1)))
            }
            "pull" => {
                state.local_images.insert(arg(args, 1).to_string());
                ok(format!("Status: Downloaded newer image for {}\n", arg(args, 1)))
            }
            _ => fail("unknown docker command"),
        }
    }

    fn kubectl(state: &mut State, spec: &CommandSpec, args: &[String]) -> Result<Outcome> {
        let namespace = spec.flag_value("-n").unwrap_or("default").to_string();
        match arg(args, 0) {
            "apply" => {
                let path = arg(args, 2).to_string();
                if state.fail_apply.contains(&path) {
                    return fail("Error from server: admission webhook denied the request\n");
                }
                state.applied.insert(path.clone());
                state.fixture_events.push((true, path));
                ok("configured\n")
            }
            "delete" => {
                let path = arg(args, 2).to_string();
                if state.fail_delete.contains(&path) {
                    return fail("Unable to connect to the server: connection refused\n");
                }
                state.applied.remove(&path);
                state.fixture_events.push((false, path));
                ok("deleted\n")
            }
            "get" if arg(args, 1) == "deployment" => {
                let key = format!("{namespace}/{}", arg(args, 2));
                match state.deployments.get(&key) {
                    Some(d) => ok(d.to_json().to_string()),
                    None => fail(format!(
                        "Error from server (NotFound): deployments.apps \"{}\" not found\n",
                        arg(args, 2)
                    )),
                }
            }
            "get" if arg(args, 1) == "pods" => {
                let selector = spec.flag_value("-l").unwrap_or_default();
                let unpullable = state.unpullable.clone();
                let items: Vec<Value> = state
                    .deployments
                    .values_mut()
                    .filter(|d| {
                        d.namespace == namespace && format!("{}={}", d.label.0, d.label.1) == selector
                    })
                    .flat_map(|d| d.list_pods(&unpullable))
                    .collect();
                ok(json!({ "items": items }).to_string())
            }
            "set" => {
                let name = arg(args, 2).trim_start_matches("deployment/");
                let key = format!("{namespace}/{name}");
                let image = arg(args, 3).split_once('=').map(|(_, i)| i.to_string());
                let polls = state.rollout_polls;
                match (state.deployments.get_mut(&key), image) {
                    (Some(d), Some(image)) => {
                        d.previous = Some(std::mem::replace(&mut d.image, image));
                        d.rollout_remaining = polls;
                        ok(format!("deployment.apps/{name} image updated\n"))
                    }
                    _ => fail(format!("Error from server (NotFound): deployments.apps \"{name}\" not found\n")),
                }
            }
            "exec" => {
                if state.fail_exec {
                    return fail("error: unable to upgrade connection: container not found\n");
                }
                let name = args
                    .iter()
                    .position(|a| a == "dig")
                    .map_or("", |i| arg(args, i + 1));
                if state.empty_answers > 0 {
                    state.empty_answers -= 1;
                    return ok("");
                }
                if name.ends_with(".maesh") && !state.unresolvable_versions.contains(&state.dns_version()) {
                    ok(format!("{RESOLVED_ADDRESS}\n"))
                } else {
                    ok("")
                }
            }
            _ => fail("error: unknown command\n"),
        }
    }

    fn prepare(state: &mut State, spec: &CommandSpec) -> Result<Outcome> {
        let kubeconfig = spec
            .get_env()
            .iter()
            .find(|(k, _)| k == "KUBECONFIG")
            .map(|(_, v)| v.clone());
        state.prepare_kubeconfig.push(kubeconfig);

        let version = state.dns_version();
        if state.rejected_versions.contains(&version) {
            fail(format!(
                "level=info msg=\"Preparing cluster\"\nlevel=error msg=\"unsupported CoreDNS version {version}\"\n"
            ))
        } else {
            ok(format!(
                "level=info msg=\"Preparing cluster\"\nlevel=info msg=\"CoreDNS {version} patched\"\n"
            ))
        }
    }
}

fn log_line(spec: &CommandSpec) -> (Vec<String>, String) {
    let mut args = Vec::with_capacity(spec.get_args().len());
    let mut iter = spec.get_args().iter();
    while let Some(a) = iter.next() {
        if a == "--kubeconfig" && spec.program() == "kubectl" {
            iter.next();
            continue;
        }
        args.push(a.clone());
    }
    let line = std::iter::once(spec.program().to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ");
    (args, line)
}

impl CommandRunner for FakeCluster {
    async fn run(&self, spec: &CommandSpec) -> Result<Outcome> {
        spec.validate()?;
        let (args, line) = log_line(spec);
        let mut state = self.state.lock();
        state.log.push(line);

        match program_name(spec) {
            "k3d" => Self::k3d(&mut state, &args),
            "docker" => Self::docker(&mut state, &args),
            "kubectl" => Self::kubectl(&mut state, spec, &args),
            "maesh" if arg(&args, 0) == "prepare" => Self::prepare(&mut state, spec),
            "maesh" => fail("unknown maesh command"),
            _ => Err(not_found(spec)),
        }
    }

    fn start(&self, spec: &CommandSpec) -> Result<ProcessHandle> {
        spec.validate()?;
        let (_, line) = log_line(spec);
        let crashes = {
            let mut state = self.state.lock();
            state.log.push(line);
            if program_name(spec) != "maesh" {
                return Err(not_found(spec));
            }
            state.controller_starts += 1;
            state.controller_crashes
        };

        let script = if crashes {
            "echo 'level=fatal msg=\"cannot reach API server\"'; exit 1"
        } else {
            "echo 'level=info msg=\"controller started\"'; exec sleep 30"
        };
        ProcessRunner::new().start(&CommandSpec::new("sh").arg("-c").arg(script))
    }
}
