use std::sync::Arc;

use volley_core::{EngineRegistry, EventFn, RunEvent};
use volley_http::{HttpEngine, HttpEngineConfig, HttpHooks};

use crate::cli::RunArgs;
use crate::{exit_codes, output, script_yaml};

pub async fn execute(args: RunArgs) -> i32 {
    let mut script = match script_yaml::load_script(&args.script).await {
        Ok(script) => script,
        Err(err) => {
            eprintln!("{err:#}");
            return exit_codes::CONFIG_ERROR;
        }
    };

    if let Some(target) = args.target {
        script.target = target;
    }
    if let Some(interval) = args.stats_interval {
        script.stats_interval = Some(interval);
    }

    if let Err(err) = script.validate() {
        eprintln!("invalid script: {err}");
        return exit_codes::CONFIG_ERROR;
    }

    let mut engines = EngineRegistry::new();
    engines.register(Arc::new(HttpEngine::new(HttpEngineConfig {
        target: script.target.clone(),
        defaults: script.defaults.clone(),
        hooks: HttpHooks::default(),
    })));

    let quiet = args.quiet;
    let on_event: EventFn = Arc::new(move |event| match event {
        RunEvent::PhaseStarted { index, phase } => {
            if !quiet {
                match phase.name() {
                    Some(name) => eprintln!("Phase {} ({name}) started", index + 1),
                    None => eprintln!("Phase {} started", index + 1),
                }
            }
        }
        RunEvent::PhaseCompleted { index, .. } => {
            if !quiet {
                eprintln!("Phase {} completed", index + 1);
            }
        }
        RunEvent::Stats(report) => {
            if !quiet {
                output::print_periodic(&report);
            }
        }
        RunEvent::Done(_) => {}
    });

    let report = match volley_core::run(script, engines, Some(on_event)).await {
        Ok(report) => report,
        Err(err) => {
            eprintln!("run failed: {err}");
            return match err {
                volley_core::Error::Join(_) => exit_codes::RUNTIME_ERROR,
                _ => exit_codes::CONFIG_ERROR,
            };
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&output::report_to_json(&report)) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("failed to serialize report: {err}");
                return exit_codes::RUNTIME_ERROR;
            }
        }
    } else {
        output::print_summary(&report);
    }

    exit_codes::OK
}
