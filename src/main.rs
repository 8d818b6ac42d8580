use std::collections::HashMap;
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};

use sign_arena::classifier::ModelArtifact;
use sign_arena::config::Config;
use sign_arena::eval;
use sign_arena::events::{ClientEvent, ServerEvent};
use sign_arena::persistence::NoopStore;
use sign_arena::pipeline::{ClientHandle, Hub};

/// One line on stdin: which user is speaking, and what they said.
#[derive(Deserialize)]
struct Inbound {
    user: String,
    #[serde(default)]
    name: Option<String>,
    event: ClientEvent,
}

#[derive(Serialize)]
struct Outbound<'a> {
    user: &'a str,
    event: &'a ServerEvent,
}

fn main() -> Result<()> {
    env_logger::init();
    let config = Config::from_env();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("eval") => {
            let dataset_path = args
                .next()
                .ok_or_else(|| anyhow::anyhow!("usage: sign-arena eval <dataset.json>"))?;
            run_eval(&config, Path::new(&dataset_path))
        }
        Some("serve") | None => serve_stdio(config),
        Some(other) => anyhow::bail!("unknown command {other}; try serve or eval"),
    }
}

fn run_eval(config: &Config, dataset_path: &Path) -> Result<()> {
    let artifact = ModelArtifact::load(&config.model_dir)?;
    let dataset = eval::load_dataset(dataset_path)?;
    let report = eval::evaluate(&dataset, &artifact, &config.session);

    println!(
        "accuracy: {:.4} ({}/{}, {} skipped)",
        report.accuracy(),
        report.correct,
        report.total,
        report.skipped
    );
    let mut classes: Vec<_> = report.per_class.iter().collect();
    classes.sort_by(|a, b| a.0.cmp(b.0));
    for (sign, class) in classes {
        println!("{sign:16} {}/{}", class.correct, class.total);
    }
    Ok(())
}

/// Line-delimited JSON bridge: client events in on stdin, server events out
/// on stdout. The transport proper (websocket or otherwise) lives outside
/// this process.
fn serve_stdio(config: Config) -> Result<()> {
    let egress_queue = config.pipeline.egress_queue;
    let artifact = match ModelArtifact::load(&config.model_dir) {
        Ok(artifact) => Some(artifact),
        Err(err) => {
            log::warn!("classifier artifact unavailable: {err:?}");
            None
        }
    };
    let hub = Hub::new(config, artifact, Arc::new(NoopStore::default()));

    let mut clients: HashMap<String, ClientHandle> = HashMap::new();
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let inbound: Inbound = match serde_json::from_str(&line) {
            Ok(inbound) => inbound,
            Err(err) => {
                log::warn!("dropping malformed event line: {err}");
                continue;
            }
        };

        let disconnecting = matches!(inbound.event, ClientEvent::Disconnect);
        let handle = clients.entry(inbound.user.clone()).or_insert_with(|| {
            let (tx, rx) = bounded::<ServerEvent>(egress_queue);
            let user = inbound.user.clone();
            thread::spawn(move || {
                for event in rx {
                    match serde_json::to_string(&Outbound { user: &user, event: &event }) {
                        Ok(json) => println!("{json}"),
                        Err(err) => log::warn!("failed to serialize egress event: {err}"),
                    }
                }
            });
            let name = inbound.name.clone().unwrap_or_else(|| inbound.user.clone());
            hub.connect(&inbound.user, &name, tx)
        });

        if handle.events.send(inbound.event).is_err() {
            log::warn!("worker for {} is gone, dropping client", inbound.user);
            clients.remove(&inbound.user);
            continue;
        }
        if disconnecting {
            if let Some(handle) = clients.remove(&inbound.user) {
                handle.shutdown();
            }
        }
    }

    for (_, handle) in clients.drain() {
        handle.shutdown();
    }
    Ok(())
}
