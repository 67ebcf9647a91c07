//! The sampling loop and its attachment state machine
//!
//! One OS thread runs `Sampler::run` for the process lifetime. Each
//! iteration discovers targets when none is known, applies a pending
//! selection (detach, attach, model reset), pulls one stack dump from the
//! attached target, and appends every thread's filtered frame sequence to
//! the model. The sampler is the sole writer of the connection state and
//! the sole producer into the model's append path.

use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::attach::{DiagnosticChannel, TargetHandle};
use crate::error::AgentError;
use crate::frame::{self, FRAME_PREFIX};
use crate::model::CallGraphModel;

/// Default delay between sampling iterations
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(10);

/// Observable sampler state, for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Discovering,
    Attached,
    Sampling,
    Disconnected,
}

pub struct Sampler {
    model: Arc<CallGraphModel>,
    channel: Arc<dyn DiagnosticChannel>,
    interval: Duration,
    state: SamplerState,
    current_pid: Option<i32>,
    handle: Option<Box<dyn TargetHandle>>,
}

impl Sampler {
    pub fn new(
        model: Arc<CallGraphModel>,
        channel: Arc<dyn DiagnosticChannel>,
        interval: Duration,
    ) -> Self {
        Self {
            model,
            channel,
            interval,
            state: SamplerState::Idle,
            current_pid: None,
            handle: None,
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Run forever; only process termination stops the loop
    pub fn run(mut self) -> ! {
        info!("sampler started");
        loop {
            self.tick();
            std::thread::sleep(self.interval);
        }
    }

    /// One loop iteration: discover, apply selection, sample
    pub fn tick(&mut self) {
        if self.current_pid.is_none() && self.model.pending_process().is_none() {
            self.discover();
        }

        if let Some(pid) = self.model.pending_process() {
            if Some(pid) != self.current_pid {
                self.switch_target(pid);
            }
        }

        if self.handle.is_some() {
            self.sample();
        }
    }

    fn discover(&mut self) {
        self.state = SamplerState::Discovering;
        let pids = self.channel.list();
        debug!("discovered targets={:?}", pids);
        self.model.set_discovered(pids.clone());
        match pids.first() {
            // Auto-select the highest pid when nothing is attached yet
            Some(&pid) => self.model.request_process(pid),
            None => self.state = SamplerState::Idle,
        }
    }

    fn switch_target(&mut self, pid: i32) {
        // Tear down the prior attachment before establishing the new one
        self.handle = None;
        info!("request change to pid={}", pid);
        match self.channel.attach(pid) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.current_pid = Some(pid);
                self.model.set_active_process(pid);
                self.model.reset();
                self.model.set_connected(true);
                self.state = SamplerState::Attached;
            }
            Err(e) => {
                warn!("{}", e);
                self.current_pid = None;
                self.model.clear_pending_process();
                self.model.set_connected(false);
                self.state = SamplerState::Idle;
            }
        }
    }

    fn sample(&mut self) {
        self.state = SamplerState::Sampling;
        let filter = self.model.frame_filter();
        let result = match self.handle.as_mut() {
            Some(handle) => handle
                .remote_dump()
                .and_then(|stream| append_dump(&self.model, stream, &filter)),
            None => return,
        };
        match result {
            Ok(()) => self.state = SamplerState::Attached,
            Err(e) => {
                debug!("dump stream failed: {}", e);
                self.handle = None;
                self.current_pid = None;
                self.model.clear_pending_process();
                self.model.set_connected(false);
                self.state = SamplerState::Disconnected;
            }
        }
    }
}

/// Parse a dump stream and append one frame sequence per thread.
///
/// A frame line dropped by the filter stays inside its thread's sequence
/// gap; any non-frame line (thread header, blank separator) ends the
/// current sequence so edges never span thread boundaries.
fn append_dump(
    model: &CallGraphModel,
    stream: Box<dyn std::io::Read + Send>,
    filter: &frame::FrameFilter,
) -> Result<(), AgentError> {
    let reader = BufReader::new(stream);
    let mut sequence = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.starts_with(FRAME_PREFIX) {
            flush_sequence(model, &mut sequence);
            continue;
        }
        if let Some(identity) = frame::parse_line(&line, filter) {
            sequence.push(identity);
        }
    }
    flush_sequence(model, &mut sequence);
    Ok(())
}

fn flush_sequence(model: &CallGraphModel, sequence: &mut Vec<frame::MethodIdentity>) {
    if !sequence.is_empty() {
        model.append(sequence);
        sequence.clear();
    }
}
