//! Front-end request handlers.
//!
//! Requests that need the debuggee run as tasks in the session's in-flight
//! set, so an unanswered debuggee request never holds up the request loop.
//! A task whose answer depends only on the debuggee's reply responds itself;
//! one whose reply changes session state hands a [`Completion`] back to the
//! loop instead.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{DebugSession, Flow, Notification};
use crate::config::{
    normalize_local_path, with_trailing_separator, AttachArgs, LaunchArgs, SourceOptions,
    DEFAULT_HOST,
};
use crate::dap::DapRequest;
use crate::sourcemap::{SourceMapFileProvider, SourceTranslator};
use crate::{AppError, Result};

/// Rejection for source paths outside the source folder.
const INVALID_SOURCE_FILE: &str = "Invalid source file (for typescript projects: please put \
\"sourceMap\": true into your tsconfig.json, for javascript-only projects: please put \
\"noSourceMaps\": true into your launch config)";

/// Adapter capabilities announced in the `initialize` response.
fn capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": true,
        "supportsEvaluateForHovers": false,
        "supportsBreakpointLocationsRequest": true,
        "supportsTerminateRequest": true,
        "supportsCancelRequest": true,
        "exceptionBreakpointFilters": [{
            "filter": "exceptions",
            "label": "All Exceptions",
            "default": false,
        }],
    })
}

fn parse_arguments<T: DeserializeOwned + Default>(arguments: &Value) -> Result<T> {
    if arguments.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(arguments.clone()).map_err(|err| AppError::Config(err.to_string()))
}

/// Prefix configuration errors with the request kind; other errors pass.
fn invalid_configuration(kind: &str, err: AppError) -> AppError {
    match err {
        AppError::Config(msg) => AppError::Config(format!("Invalid {kind} configuration: {msg}")),
        other => other,
    }
}

fn request_failed(what: &str, err: &AppError) -> AppError {
    AppError::Request(format!("{what}: {}", err.message()))
}

/// JavaScript-style truthiness of an optional flag field.
fn is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Debuggee round trip whose reply updates session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Step {
    ConfigurationDone,
    Threads,
    StackTrace,
    Scopes,
}

/// Finished round trip, handed back to the request loop.
#[derive(Debug)]
pub(super) struct Completion {
    request: DapRequest,
    step: Step,
    outcome: Result<Value>,
}

/// Where and how long to wait for the debuggee.
struct ConnectTarget {
    host: String,
    port: u16,
    timeout: Duration,
}

fn line_of(value: Option<&Value>) -> u32 {
    value
        .and_then(Value::as_u64)
        .and_then(|line| u32::try_from(line).ok())
        .unwrap_or(0)
}

impl DebugSession {
    pub(super) async fn dispatch(&mut self, request: DapRequest) -> Flow {
        debug!(seq = request.seq, command = %request.command, "session: request");
        let command = request.command.clone();

        let result = match command.as_str() {
            "initialize" => {
                self.lines_start_at1 = request
                    .arguments
                    .get("linesStartAt1")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                Ok(Some(capabilities()))
            }
            "launch" => {
                self.launch(request).await;
                return Flow::Continue;
            }
            "attach" => {
                self.attach(request);
                return Flow::Continue;
            }
            "configurationDone" => {
                self.configuration_done(request);
                return Flow::Continue;
            }
            "setExceptionBreakpoints" => {
                self.set_exception_breakpoints(request);
                return Flow::Continue;
            }
            "setBreakpoints" => {
                self.set_breakpoints(request).await;
                return Flow::Continue;
            }
            "breakpointLocations" => Ok(Some(self.breakpoint_locations(&request.arguments))),
            "threads" => {
                self.spawn_round_trip(request, Step::Threads, "threads");
                return Flow::Continue;
            }
            "stackTrace" => {
                self.spawn_round_trip(request, Step::StackTrace, "stacktrace");
                return Flow::Continue;
            }
            "scopes" => {
                self.scopes(request);
                return Flow::Continue;
            }
            "variables" => Ok(Some(self.variables(&request.arguments))),
            "pause" | "continue" | "next" | "stepIn" | "stepOut" => {
                self.execution(request);
                return Flow::Continue;
            }
            "terminate" | "cancel" => {
                let supervisor = self.supervisor.clone();
                self.spawn_reply(request, async move { supervisor.terminate().await.map(|()| None) });
                return Flow::Continue;
            }
            "disconnect" => {
                self.disconnect().await;
                self.frontend.respond(&request, Ok(None));
                return Flow::Stop;
            }
            other => Err(AppError::Request(format!("unsupported request: {other}"))),
        };

        self.frontend.respond(&request, result);
        Flow::Continue
    }

    /// Apply a finished round trip to the session and answer its request.
    pub(super) fn complete(&mut self, completion: Completion) {
        let Completion {
            request,
            step,
            outcome,
        } = completion;

        let result = match step {
            Step::ConfigurationDone => {
                self.finish_configuration(&request, outcome);
                return;
            }
            Step::Threads => outcome.map(|threads| Some(self.list_threads(&threads))),
            Step::StackTrace => outcome
                .map_err(|err| request_failed("stackTrace request failed", &err))
                .map(|frames| Some(self.list_frames(&frames))),
            Step::Scopes => outcome
                .map_err(|err| request_failed("scopes request failed", &err))
                .map(|scopes| Some(self.list_scopes(&scopes))),
        };
        self.frontend.respond(&request, result);
    }

    // ── In-flight requests ────────────────────────────────────────────────────

    /// Run `work` off the request loop and answer `request` with its result.
    fn spawn_reply<F>(&mut self, request: DapRequest, work: F)
    where
        F: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        let frontend = self.frontend.clone();
        self.in_flight.spawn(async move {
            let result = work.await;
            frontend.respond(&request, result);
            None
        });
    }

    /// Send `command` to the debuggee off the request loop and hand the reply
    /// back as a [`Completion`].
    fn spawn_round_trip(&mut self, request: DapRequest, step: Step, command: &'static str) {
        let transport = self.transport.clone();
        self.in_flight.spawn(async move {
            let outcome = transport
                .send(command, None, None)
                .await
                .map(|outcome| outcome.response);
            Some(Completion {
                request,
                step,
                outcome,
            })
        });
    }

    // ── Launch / attach ───────────────────────────────────────────────────────

    async fn launch(&mut self, request: DapRequest) {
        match self.start_runtime(&request.arguments).await {
            Ok(Some(target)) => self.spawn_connect(request, target),
            Ok(None) => self.frontend.respond(&request, Ok(None)),
            Err(err) => self.frontend.respond(&request, Err(err)),
        }
    }

    /// Validate launch arguments and start the runtime. Returns where to
    /// connect in debug mode, `None` in run mode.
    async fn start_runtime(&mut self, arguments: &Value) -> Result<Option<ConnectTarget>> {
        let args: LaunchArgs =
            parse_arguments(arguments).map_err(|err| invalid_configuration("launch", err))?;

        self.status.paused = !args.no_debug;
        self.configure_sources(args.source_options())
            .map_err(|err| invalid_configuration("launch", err))?;
        let plan = args
            .plan(&self.runtime)
            .map_err(|err| invalid_configuration("launch", err))?;

        self.supervisor.launch(&plan).await?;

        if plan.no_debug {
            // Nothing will report readiness in run mode.
            self.status.initialized = true;
            self.notify(Notification::Initialized);
            return Ok(None);
        }

        Ok(Some(ConnectTarget {
            host: DEFAULT_HOST.to_owned(),
            port: plan.port,
            timeout: plan.timeout,
        }))
    }

    fn attach(&mut self, request: DapRequest) {
        match self.attach_target(&request.arguments) {
            Ok(target) => self.spawn_connect(request, target),
            Err(err) => self.frontend.respond(&request, Err(err)),
        }
    }

    fn attach_target(&mut self, arguments: &Value) -> Result<ConnectTarget> {
        let args: AttachArgs =
            parse_arguments(arguments).map_err(|err| invalid_configuration("attach", err))?;

        self.configure_sources(args.source_options())
            .map_err(|err| invalid_configuration("attach", err))?;

        let port = args
            .port
            .filter(|&p| p != 0)
            .unwrap_or(self.runtime.default_port);
        let timeout = args
            .timeout
            .filter(|&t| t != 0)
            .map_or_else(|| self.runtime.connect_timeout(), Duration::from_millis);

        info!(host = %args.host(), port, "session: attaching");
        Ok(ConnectTarget {
            host: args.host().to_owned(),
            port,
            timeout,
        })
    }

    /// Answer `request` once the debuggee announced itself or the connect
    /// failed.
    fn spawn_connect(&mut self, request: DapRequest, target: ConnectTarget) {
        let transport = self.transport.clone();
        self.spawn_reply(request, async move {
            let ConnectTarget {
                host,
                port,
                timeout,
            } = target;
            transport
                .connect(&host, port, timeout)
                .await
                .map(|()| None)
                .map_err(|err| {
                    AppError::Connection(format!(
                        "Could not connect to runtime at {host}:{port} ({})",
                        err.message()
                    ))
                })
        });
    }

    /// Validate folders and set up source translation.
    fn configure_sources(&mut self, options: SourceOptions<'_>) -> Result<()> {
        let layout = options.resolve()?;

        self.translator = match &layout.maps_folder {
            Some(folder) => SourceTranslator::new(SourceMapFileProvider::new(folder)),
            None => SourceTranslator::disabled(),
        };

        let source_folder = match &layout.source_folder {
            Some(folder) => folder.clone(),
            None => {
                // Reading the program's own map reveals where the sources live.
                self.translator.mapping_for_generated(&layout.program_name);
                match self.translator.discovered_source_dir() {
                    Some(dir) => with_trailing_separator(&normalize_local_path(&format!(
                        "{}{dir}",
                        layout.program_folder
                    ))),
                    None => layout.program_folder.clone(),
                }
            }
        };

        info!(
            program = %layout.program_name,
            source_folder = %source_folder,
            maps_folder = ?layout.maps_folder,
            "session: sources configured"
        );
        self.source_folder = Some(source_folder);
        self.program_folder = Some(layout.program_folder);
        Ok(())
    }

    // ── Configuration ─────────────────────────────────────────────────────────

    fn configuration_done(&mut self, request: DapRequest) {
        self.status.frontend_ready = true;
        self.flush_pending();

        if self.status.initialized && self.status.paused {
            self.spawn_round_trip(request, Step::ConfigurationDone, "continue");
        } else {
            self.frontend.respond(&request, Ok(None));
        }
    }

    fn finish_configuration(&mut self, request: &DapRequest, outcome: Result<Value>) {
        match outcome {
            Ok(_) => {
                self.status.paused = false;
                self.frontend.respond(request, Ok(None));
                self.notify(Notification::Continued {
                    thread_id: self.current_thread_id,
                });
            }
            Err(err) => self.frontend.respond(
                request,
                Err(request_failed("Could not start runtime debugger", &err)),
            ),
        }
    }

    fn set_exception_breakpoints(&mut self, request: DapRequest) {
        // A single filter is offered; any selection means "all exceptions".
        let stop_on_exceptions = request
            .arguments
            .get("filters")
            .and_then(Value::as_array)
            .is_some_and(|filters| !filters.is_empty());

        let transport = self.transport.clone();
        self.spawn_reply(request, async move {
            transport
                .send("stopOnExceptions", Some(Value::Bool(stop_on_exceptions)), None)
                .await
                .map(|_| None)
                .map_err(|err| request_failed("Could not send stopOnException request", &err))
        });
    }

    async fn set_breakpoints(&mut self, request: DapRequest) {
        match self.prepare_breakpoints(&request.arguments).await {
            Ok(Some((params, verified))) => {
                let transport = self.transport.clone();
                self.spawn_reply(request, async move {
                    transport
                        .send("setBreakpoints", Some(Value::Array(params)), None)
                        .await
                        .map_err(|err| request_failed("setBreakpoints request failed", &err))?;
                    Ok(Some(json!({ "breakpoints": verified })))
                });
            }
            // Breakpoints are sent again once the debuggee reports readiness.
            Ok(None) => self
                .frontend
                .respond(&request, Ok(Some(json!({ "breakpoints": [] })))),
            Err(err) => self.frontend.respond(&request, Err(err)),
        }
    }

    /// Translate requested breakpoints into debuggee locations and cache the
    /// verified front-end breakpoints. `None` while not connected.
    async fn prepare_breakpoints(
        &mut self,
        args: &Value,
    ) -> Result<Option<(Vec<Value>, Vec<Value>)>> {
        let path = args
            .get("source")
            .and_then(|source| source.get("path"))
            .and_then(Value::as_str)
            .map(normalize_local_path)
            .unwrap_or_default();

        if !self.transport.is_connected().await {
            return Ok(None);
        }

        if path.is_empty() {
            return Err(AppError::Config(
                "No path specified in setBreakpointsRequest".into(),
            ));
        }
        let Some(source_folder) = self.source_folder.clone() else {
            return Err(AppError::Request(
                "Invalid source folder in setBreakpointsRequest".into(),
            ));
        };
        let Some(file) = path.strip_prefix(source_folder.as_str()) else {
            return Err(AppError::Config(INVALID_SOURCE_FILE.into()));
        };

        let generated = self.translator.to_generated_file(file);
        let source = self.source_for(&generated);

        let mut params = Vec::new();
        let mut verified = Vec::new();
        let requested = args
            .get("breakpoints")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for breakpoint in requested {
            let Some(line) = breakpoint.get("line").and_then(Value::as_i64) else {
                continue;
            };
            let original_line = self.line_from_client(line);
            let generated_line = self.translator.to_generated_line(file, original_line);
            params.push(json!({ "file": generated, "line": generated_line }));
            verified.push(json!({ "verified": true, "line": line, "source": source }));
        }

        if let Some(source_path) = source.get("path").and_then(Value::as_str) {
            self.breakpoints
                .insert(normalize_local_path(source_path), verified.clone());
        }

        debug!(file = %generated, count = params.len(), "session: setting breakpoints");
        Ok(Some((params, verified)))
    }

    fn breakpoint_locations(&self, args: &Value) -> Value {
        let breakpoints = args
            .get("source")
            .and_then(|source| source.get("path"))
            .and_then(Value::as_str)
            .and_then(|path| self.breakpoints.get(&normalize_local_path(path)))
            .cloned()
            .unwrap_or_default();
        json!({ "breakpoints": breakpoints })
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    fn list_threads(&mut self, reply: &Value) -> Value {
        let threads = reply.as_array().map(Vec::as_slice).unwrap_or_default();

        self.current_thread_id = 0;
        let mut listed = Vec::with_capacity(threads.len());
        for thread in threads {
            let id = thread.get("id").and_then(Value::as_i64).unwrap_or(0);
            if thread.get("type").and_then(Value::as_str) == Some("main") {
                self.main_thread_id = id;
            }
            if is_set(thread.get("debug")) {
                self.current_thread_id = id;
            }
            let file = thread.get("file").and_then(Value::as_str).unwrap_or_default();
            let name = self.translator.to_original_file(file);
            listed.push(json!({ "id": id, "name": name }));
        }
        if self.current_thread_id == 0 {
            self.current_thread_id = self.main_thread_id;
        }

        json!({ "threads": listed })
    }

    fn list_frames(&mut self, reply: &Value) -> Value {
        let mut frames = reply.as_array().map(Vec::as_slice).unwrap_or_default();

        if let Some((last, rest)) = frames.split_last() {
            if last.get("file").and_then(Value::as_str) == Some("native") {
                frames = rest;
            }
        }

        let mut frame_id = self.current_thread_id;
        let mut stack = Vec::with_capacity(frames.len());
        for frame in frames {
            let file = frame.get("file").and_then(Value::as_str).unwrap_or_default();
            let name = frame
                .get("function")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let line = self
                .translator
                .to_original_line(file, line_of(frame.get("line")));
            stack.push(json!({
                "id": frame_id,
                "name": name,
                "source": self.source_for(file),
                "line": self.line_to_client(line),
                "column": 0,
            }));
            frame_id = 0;
        }

        json!({ "stackFrames": stack, "totalFrames": frames.len() })
    }

    fn scopes(&mut self, request: DapRequest) {
        self.scopes.reset();

        let frame_id = request
            .arguments
            .get("frameId")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if frame_id == 0 || frame_id != self.current_thread_id {
            self.frontend
                .respond(&request, Ok(Some(json!({ "scopes": [] }))));
            return;
        }

        self.spawn_round_trip(request, Step::Scopes, "scopes");
    }

    fn list_scopes(&mut self, reply: &Value) -> Value {
        let data = reply.as_array().map(Vec::as_slice).unwrap_or_default();

        let roots = self.scopes.build(data).to_vec();
        let scopes: Vec<Value> = roots
            .iter()
            .filter_map(|id| self.scopes.get(*id))
            .map(|node| {
                json!({
                    "name": node.name,
                    "variablesReference": node.id,
                    "expensive": false,
                })
            })
            .collect();
        json!({ "scopes": scopes })
    }

    fn variables(&self, args: &Value) -> Value {
        let reference = args
            .get("variablesReference")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let variables: Vec<Value> = self
            .scopes
            .children(reference)
            .map(|node| {
                let reference = if node.children.is_empty() { 0 } else { node.id };
                json!({
                    "name": node.name,
                    "type": node.kind.to_lowercase(),
                    "value": node.value,
                    "variablesReference": reference,
                    "indexedVariables": 0,
                    "namedVariables": node.children.len(),
                })
            })
            .collect();
        json!({ "variables": variables })
    }

    // ── Execution control ─────────────────────────────────────────────────────

    fn execution(&mut self, request: DapRequest) {
        let command = request.command.clone();
        let debuggee_request = match command.as_str() {
            "next" => "stepOver".to_owned(),
            other => other.to_owned(),
        };
        let transport = self.transport.clone();
        self.spawn_reply(request, async move {
            transport
                .send(&debuggee_request, None, None)
                .await
                .map_err(|err| request_failed(&format!("{command} request failed"), &err))?;
            Ok((command == "continue").then(|| json!({ "allThreadsContinued": true })))
        });
    }

    async fn disconnect(&mut self) {
        if let Err(err) = self.supervisor.terminate().await {
            warn!(%err, "session: terminate on disconnect failed");
        }
        self.transport.disconnect().await;
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// DAP `Source` for a debuggee file.
    fn source_for(&mut self, generated: &str) -> Value {
        let name = self.translator.to_original_file(generated);
        let folder = self
            .source_folder
            .as_deref()
            .or(self.program_folder.as_deref())
            .unwrap_or_default();
        json!({
            "name": name,
            "path": normalize_local_path(&format!("{folder}{name}")),
        })
    }

    fn line_from_client(&self, line: i64) -> u32 {
        let line = if self.lines_start_at1 { line } else { line + 1 };
        u32::try_from(line).unwrap_or(0)
    }

    fn line_to_client(&self, line: u32) -> i64 {
        let line = i64::from(line);
        if self.lines_start_at1 {
            line
        } else {
            line - 1
        }
    }
}
