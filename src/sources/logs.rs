//! Logs adapter (spec §4.6): tails container logs for pods matching a label
//! selector, emitting a raw event on the first matching pattern per line.
//!
//! Grounded on the teacher's `lib/file-source` tailing idiom, adapted from
//! local files to `kube`'s pod log stream API: one tail task per pod,
//! started and stopped as pods come and go, watched the same way the
//! informer adapter watches its GVR.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, LogParams};
use kube::runtime::watcher::{self, Event};
use kube::Client;
use metrics::counter;
use regex::Regex;
use serde_json::{json, Value};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Error;
use crate::event::{EventHint, RawEvent};
use crate::k8s::ingester::{LogPattern, LogsConfig};
use crate::k8s::observation::ResourceRef;
use crate::sources::{AdapterStatus, SourceAdapter, StatusCell};

struct CompiledPattern {
    regex: Regex,
    event_type: String,
}

pub struct LogsAdapter {
    source: String,
    namespace: String,
    config: LogsConfig,
    client: Client,
    status: StatusCell,
    patterns: Vec<CompiledPattern>,
}

impl LogsAdapter {
    pub fn new(source: String, namespace: String, config: LogsConfig, client: Client) -> Result<Self, Error> {
        let patterns = config
            .patterns
            .iter()
            .map(compile_pattern)
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Self {
            source,
            namespace,
            config,
            client,
            status: StatusCell::new(),
            patterns,
        })
    }
}

fn compile_pattern(pattern: &LogPattern) -> Result<CompiledPattern, Error> {
    Regex::new(&pattern.regex)
        .map(|regex| CompiledPattern {
            regex,
            event_type: pattern.event_type.clone(),
        })
        .map_err(|e| Error::Config {
            source_name: pattern.event_type.clone(),
            reason: format!("invalid log pattern regex: {e}"),
        })
}

#[async_trait]
impl SourceAdapter for LogsAdapter {
    fn source(&self) -> &str {
        &self.source
    }

    fn status(&self) -> AdapterStatus {
        self.status.snapshot()
    }

    async fn start(&self, tx: mpsc::Sender<RawEvent>, cancel: CancellationToken) -> Result<(), Error> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let wc = watcher::Config::default().labels(&self.config.label_selector);
        let mut tails: HashMap<String, (JoinHandle<()>, CancellationToken)> = HashMap::new();

        info!(source = %self.source, selector = %self.config.label_selector, "starting logs adapter");

        loop {
            let stream = watcher::watcher(pods.clone(), wc.clone());
            tokio::pin!(stream);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        for (_, (handle, pod_cancel)) in tails.drain() {
                            pod_cancel.cancel();
                            handle.abort();
                        }
                        return Ok(());
                    }
                    item = stream.next() => {
                        match item {
                            Some(Ok(Event::Applied(pod))) => self.ensure_tail(&pods, pod, &tx, &cancel, &mut tails),
                            Some(Ok(Event::Restarted(pods_list))) => {
                                for pod in pods_list {
                                    self.ensure_tail(&pods, pod, &tx, &cancel, &mut tails);
                                }
                            }
                            Some(Ok(Event::Deleted(pod))) => {
                                if let Some(name) = pod.metadata.name.as_ref() {
                                    if let Some((handle, pod_cancel)) = tails.remove(name) {
                                        pod_cancel.cancel();
                                        handle.abort();
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                self.status.record_error();
                                counter!("zen_watcher_adapter_errors_total", "source" => self.source.clone(), "kind" => "logs").increment(1);
                                warn!(source = %self.source, error = %e, "[ADAPTER_ERROR] pod watch disconnected, reconnecting");
                                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
            if cancel.is_cancelled() {
                return Ok(());
            }
        }
    }
}

impl LogsAdapter {
    fn ensure_tail(
        &self,
        pods: &Api<Pod>,
        pod: Pod,
        tx: &mpsc::Sender<RawEvent>,
        parent_cancel: &CancellationToken,
        tails: &mut HashMap<String, (JoinHandle<()>, CancellationToken)>,
    ) {
        let Some(name) = pod.metadata.name.clone() else {
            return;
        };
        if tails.contains_key(&name) {
            return;
        }

        let pod_cancel = parent_cancel.child_token();
        let pods = pods.clone();
        let tx = tx.clone();
        let source = self.source.clone();
        let namespace = self.namespace.clone();
        let patterns = self.patterns.iter().map(|p| (p.regex.clone(), p.event_type.clone())).collect::<Vec<_>>();

        let handle = tokio::spawn(tail_pod(pods, name.clone(), namespace, source, patterns, tx, pod_cancel.clone()));
        tails.insert(name, (handle, pod_cancel));
    }
}

async fn tail_pod(
    pods: Api<Pod>,
    pod_name: String,
    namespace: String,
    source: String,
    patterns: Vec<(Regex, String)>,
    tx: mpsc::Sender<RawEvent>,
    cancel: CancellationToken,
) {
    let params = LogParams {
        follow: true,
        ..Default::default()
    };
    let stream = match pods.log_stream(&pod_name, &params).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(pod = %pod_name, error = %e, "[ADAPTER_ERROR] failed to open log stream");
            return;
        }
    };

    let mut lines = stream.lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if let Some(raw) = match_line(&line, &patterns, &source, &namespace, &pod_name) {
                            if tx.send(raw).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!(pod = %pod_name, error = %e, "log stream read error");
                        return;
                    }
                }
            }
        }
    }
}

fn match_line(
    line: &str,
    patterns: &[(Regex, String)],
    source: &str,
    namespace: &str,
    pod_name: &str,
) -> Option<RawEvent> {
    for (regex, event_type) in patterns {
        if let Some(captures) = regex.captures(line) {
            let mut fields = serde_json::Map::new();
            for name in regex.capture_names().flatten() {
                if let Some(value) = captures.name(name) {
                    fields.insert(name.to_string(), Value::String(value.as_str().to_string()));
                }
            }
            let payload = json!({ "type": event_type, "fields": fields, "line": line });
            let hint = EventHint {
                resource: Some(ResourceRef {
                    api_version: "v1".to_string(),
                    kind: "Pod".to_string(),
                    name: pod_name.to_string(),
                    namespace: Some(namespace.to_string()),
                }),
                namespace: Some(namespace.to_string()),
                native_severity: None,
                event_type: Some(event_type.clone()),
                detected_at: None,
            };
            return Some(RawEvent::new(source, payload).with_hint(hint));
        }
    }
    None
}
