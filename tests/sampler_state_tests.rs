//! Integration tests for the sampler state machine, driven by a scripted
//! diagnostic channel instead of a live JVM

use std::collections::VecDeque;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vigia::attach::{DiagnosticChannel, TargetHandle};
use vigia::error::AgentError;
use vigia::model::CallGraphModel;
use vigia::sampler::{Sampler, SamplerState};

type DumpScript = Arc<Mutex<VecDeque<std::io::Result<String>>>>;

struct ScriptedChannel {
    pids: Mutex<Vec<i32>>,
    dumps: DumpScript,
    refuse_attach: bool,
}

impl ScriptedChannel {
    fn new(pids: Vec<i32>) -> Self {
        Self {
            pids: Mutex::new(pids),
            dumps: Arc::new(Mutex::new(VecDeque::new())),
            refuse_attach: false,
        }
    }

    fn push_dump(&self, dump: &str) {
        self.dumps
            .lock()
            .unwrap()
            .push_back(Ok(dump.to_string()));
    }

    fn push_failure(&self) {
        self.dumps.lock().unwrap().push_back(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "dump channel closed",
        )));
    }
}

struct ScriptedHandle {
    dumps: DumpScript,
}

impl TargetHandle for ScriptedHandle {
    fn remote_dump(&mut self) -> Result<Box<dyn Read + Send>, AgentError> {
        match self.dumps.lock().unwrap().pop_front() {
            Some(Ok(dump)) => Ok(Box::new(std::io::Cursor::new(dump.into_bytes()))),
            Some(Err(e)) => Err(AgentError::StreamRead(e)),
            // Quiet target: an empty dump
            None => Ok(Box::new(std::io::empty())),
        }
    }
}

impl DiagnosticChannel for ScriptedChannel {
    fn list(&self) -> Vec<i32> {
        self.pids.lock().unwrap().clone()
    }

    fn attach(&self, pid: i32) -> Result<Box<dyn TargetHandle>, AgentError> {
        if self.refuse_attach {
            return Err(AgentError::Attachment {
                pid,
                reason: "attach refused".to_string(),
            });
        }
        Ok(Box::new(ScriptedHandle {
            dumps: Arc::clone(&self.dumps),
        }))
    }
}

fn sampler_with(
    channel: Arc<ScriptedChannel>,
) -> (Sampler, Arc<CallGraphModel>) {
    let model = Arc::new(CallGraphModel::new());
    let sampler = Sampler::new(
        Arc::clone(&model),
        channel as Arc<dyn DiagnosticChannel>,
        Duration::from_millis(1),
    );
    (sampler, model)
}

const DUMP: &str = "\"main\" #1 prio=5\n\
                    \tat app.svc.Dao.load(Dao.java:5)\n\
                    \tat app.svc.Handler.invoke(Handler.java:9)\n";

#[test]
fn test_idle_without_targets() {
    let channel = Arc::new(ScriptedChannel::new(vec![]));
    let (mut sampler, model) = sampler_with(channel);

    sampler.tick();
    assert_eq!(sampler.state(), SamplerState::Idle);
    assert!(!model.is_connected());
    assert!(model.discovered().is_empty());
}

#[test]
fn test_discovery_auto_selects_first_target_and_samples() {
    let channel = Arc::new(ScriptedChannel::new(vec![300, 200]));
    channel.push_dump(DUMP);
    let (mut sampler, model) = sampler_with(Arc::clone(&channel));

    sampler.tick();
    assert_eq!(sampler.state(), SamplerState::Attached);
    assert!(model.is_connected());
    assert_eq!(model.active_process(), Some(300));
    assert_eq!(model.discovered(), vec![300, 200]);

    let snap = model.snapshot();
    assert_eq!(snap.nodes.len(), 2);
    assert_eq!(snap.links.len(), 1);
    // Innermost frame first: load is the caller, invoke the callee
    assert_eq!(snap.nodes[snap.links[0].caller_id].method_name, "load");
}

#[test]
fn test_stream_failure_forces_disconnect_then_recovery() {
    let channel = Arc::new(ScriptedChannel::new(vec![300]));
    channel.push_dump(DUMP);
    let (mut sampler, model) = sampler_with(Arc::clone(&channel));

    sampler.tick();
    assert_eq!(sampler.state(), SamplerState::Attached);

    channel.push_failure();
    sampler.tick();
    assert_eq!(sampler.state(), SamplerState::Disconnected);
    assert!(!model.is_connected());

    // Next pass rediscovers and reattaches
    sampler.tick();
    assert_eq!(sampler.state(), SamplerState::Attached);
    assert!(model.is_connected());
}

#[test]
fn test_pending_selection_is_applied_in_loop_with_reset() {
    let channel = Arc::new(ScriptedChannel::new(vec![300, 200]));
    channel.push_dump(DUMP);
    let (mut sampler, model) = sampler_with(Arc::clone(&channel));

    sampler.tick();
    assert!(!model.snapshot().nodes.is_empty());

    // Selection arrives asynchronously; nothing changes until the next tick
    model.request_process(200);
    assert_eq!(model.active_process(), Some(300));

    sampler.tick();
    assert_eq!(model.active_process(), Some(200));
    // The switch reset the graph; only post-switch samples remain
    assert!(model.snapshot().nodes.is_empty());
}

#[test]
fn test_attach_failure_leaves_detached_and_retries_discovery() {
    let mut channel = ScriptedChannel::new(vec![300]);
    channel.refuse_attach = true;
    let channel = Arc::new(channel);
    let (mut sampler, model) = sampler_with(channel);

    sampler.tick();
    assert_eq!(sampler.state(), SamplerState::Idle);
    assert!(!model.is_connected());
    assert_eq!(model.active_process(), None);
    // Selection was dropped so the next iteration rediscovers
    assert_eq!(model.pending_process(), None);
}

#[test]
fn test_filter_applies_to_sampled_frames() {
    let channel = Arc::new(ScriptedChannel::new(vec![300]));
    channel.push_dump(
        "\tat app.svc.Dao.load(Dao.java:5)\n\
         \tat other.pkg.Foo.bar(Foo.java:1)\n\
         \tat app.svc.Handler.invoke(Handler.java:9)\n",
    );
    let (mut sampler, model) = sampler_with(Arc::clone(&channel));
    model.set_white_list("app\\..*").unwrap();

    sampler.tick();
    let snap = model.snapshot();
    assert_eq!(snap.nodes.len(), 2);
    assert!(snap.nodes.iter().all(|n| n.package_name == "app.svc"));
}

#[test]
fn test_discovery_is_deterministic_without_process_changes() {
    let channel = Arc::new(ScriptedChannel::new(vec![500, 400, 300]));
    assert_eq!(channel.list(), channel.list());
}
