use std::{sync::Arc, time::Duration};

use ilforge::{
    protocol::{LoadOptions, Session},
    runtime::{CancellationToken, MethodState, TaskOutput, Value},
};
use serde::Serialize;

use crate::{
    app::{BuildOptions, GlobalOptions},
    commands::common::{build_with, load_settings},
    output::print_output,
    tcp::TcpTransport,
};

pub struct RunOptions<'a> {
    pub host: &'a str,
    pub args: &'a [i32],
    pub static_constructors: bool,
    pub timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub entry: String,
    pub task_id: u16,
    /// Intermediate data sent while the method was running
    pub data: Vec<Vec<u8>>,
    pub state: MethodState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

pub fn run(options: &BuildOptions, run: &RunOptions<'_>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let mut settings = load_settings(options)?;
    if let Some(seconds) = run.timeout {
        settings.programming_timeout_ms = seconds.saturating_mul(1000);
    }
    let build = build_with(options, settings)?;
    let universe = &build.program.universe;
    let set = &build.set;

    let transport = Arc::new(TcpTransport::connect(run.host)?);
    let mut session = Session::new(transport);
    if let Some(seconds) = run.timeout {
        session = session.with_timeout(Duration::from_secs(seconds));
    }

    let hardware = session.query_capabilities()?;
    log::info!(
        "Board speaks protocol {}, {} of {} bytes flash used",
        hardware.protocol_version,
        hardware.flash_used,
        hardware.flash_size
    );

    let cancel = CancellationToken::new();
    let load = LoadOptions {
        run_static_constructors: run.static_constructors,
        cancel: cancel.clone(),
    };
    let task = session.load(universe, set, &load)?;

    let arguments: Vec<Value> = run.args.iter().copied().map(Value::Int32).collect();
    log::info!("Starting {}", universe.method_signature(build.main));
    task.run(&session, &arguments, &cancel)?;

    let mut report = RunReport {
        entry: universe.method_signature(build.main),
        task_id: task.task_id(),
        data: Vec::new(),
        state: MethodState::Running,
        result: None,
    };
    // an aborted task surfaces here as the remote exception
    while let Some((state, output)) = task.get_method_results(universe, set)? {
        report.state = state;
        match output {
            TaskOutput::Data(data) => {
                log::debug!("Task {} sent {} bytes", report.task_id, data.len());
                report.data.push(data);
            }
            TaskOutput::Returned(value) => report.result = Some(value),
            TaskOutput::Killed => log::warn!("Task {} was killed", report.task_id),
        }
    }

    print_output(&report, opts, |report| {
        for data in &report.data {
            let hex: Vec<String> = data.iter().map(|b| format!("{b:02x}")).collect();
            println!("Data:            {}", hex.join(" "));
        }
        println!("State:           {}", report.state);
        if let Some(value) = &report.result {
            println!("Result:          {value}");
        }
    })
}
