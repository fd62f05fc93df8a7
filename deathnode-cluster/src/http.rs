use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use deathnode_core::cluster_view::{extract_ip_from_pid, Agent, Framework, Label, Task};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::instrument;
use url::Url;

use crate::{ClusterClient, Error, RequestSnafu};

const TASKS_PAGE_SIZE: usize = 100;

/// Real cluster-manager backend, wrapping a plain `reqwest::Client`.
///
/// Grounded on `trino-lb`'s `trino_client/cluster_info.rs`: a single client
/// field, one method per endpoint, `#[instrument]`, snafu-contexted errors.
/// Unlike that client this one carries no cookie jar or login step; the
/// cluster manager here has no session-based auth.
pub struct HttpClusterClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpClusterClient {
    pub fn new(base_url: Url, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client config is static and valid");

        Self { client, base_url }
    }

    fn url(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .expect("path is a static, valid relative URL")
    }
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    tasks: Vec<WireTask>,
}

#[derive(Debug, Deserialize)]
struct WireTask {
    name: String,
    state: String,
    slave_id: String,
    framework_id: String,
    #[serde(default)]
    labels: Vec<WireLabel>,
}

#[derive(Debug, Deserialize)]
struct WireLabel {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct FrameworksResponse {
    frameworks: Vec<WireFramework>,
}

#[derive(Debug, Deserialize)]
struct WireFramework {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct SlavesResponse {
    slaves: Vec<WireSlave>,
}

#[derive(Debug, Deserialize)]
struct WireSlave {
    id: String,
    hostname: String,
    pid: String,
}

#[derive(Debug, Serialize)]
struct MaintenanceSchedule {
    windows: Vec<MaintenanceWindow>,
}

#[derive(Debug, Serialize)]
struct MaintenanceWindow {
    machine_ids: Vec<MachineId>,
    unavailability: Unavailability,
}

#[derive(Debug, Serialize)]
struct MachineId {
    hostname: String,
    ip: String,
}

#[derive(Debug, Serialize)]
struct Unavailability {
    start: UnavailabilityStart,
}

#[derive(Debug, Serialize)]
struct UnavailabilityStart {
    nanoseconds: u64,
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    #[instrument(skip(self))]
    async fn get_agents(&self) -> Result<Vec<Agent>, Error> {
        let url = self.url("/master/slaves");

        let response: SlavesResponse = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .context(RequestSnafu {
                url: url.to_string(),
            })?
            .json()
            .await
            .context(RequestSnafu {
                url: url.to_string(),
            })?;

        Ok(response
            .slaves
            .into_iter()
            .filter_map(|slave| {
                let private_ip = match extract_ip_from_pid(&slave.pid) {
                    Ok(ip) => ip,
                    Err(source) => {
                        tracing::warn!(%source, pid = %slave.pid, "malformed agent pid, skipping agent");
                        return None;
                    }
                };
                Some(Agent {
                    agent_id: slave.id,
                    hostname: slave.hostname,
                    private_ip,
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_frameworks(&self) -> Result<Vec<Framework>, Error> {
        let url = self.url("/master/frameworks");

        let response: FrameworksResponse = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .context(RequestSnafu {
                url: url.to_string(),
            })?
            .json()
            .await
            .context(RequestSnafu {
                url: url.to_string(),
            })?;

        Ok(response
            .frameworks
            .into_iter()
            .map(|framework| Framework {
                framework_id: framework.id,
                name: framework.name,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_tasks(&self) -> Result<Vec<Task>, Error> {
        let mut tasks = Vec::new();
        let mut offset = 0usize;

        loop {
            let path = format!("/master/tasks?limit={TASKS_PAGE_SIZE}&offset={offset}");
            let url = self.url(&path);

            let response: TasksResponse = self
                .client
                .get(url.clone())
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .context(RequestSnafu {
                    url: url.to_string(),
                })?
                .json()
                .await
                .context(RequestSnafu {
                    url: url.to_string(),
                })?;

            let page_len = response.tasks.len();

            tasks.extend(
                response
                    .tasks
                    .into_iter()
                    .filter(|task| task.state == "TASK_RUNNING")
                    .map(|task| Task {
                        name: task.name,
                        state: task.state,
                        agent_id: task.slave_id,
                        framework_id: task.framework_id,
                        labels: task
                            .labels
                            .into_iter()
                            .map(|label| Label {
                                key: label.key,
                                value: label.value,
                            })
                            .collect(),
                        is_protected: false,
                    }),
            );

            if page_len < TASKS_PAGE_SIZE {
                break;
            }
            offset += TASKS_PAGE_SIZE;
        }

        Ok(tasks)
    }

    #[instrument(skip(self, hosts))]
    async fn set_agents_in_maintenance(
        &self,
        hosts: &HashMap<String, String>,
    ) -> Result<(), Error> {
        let url = self.url("/maintenance/schedule");

        let schedule = MaintenanceSchedule {
            windows: vec![MaintenanceWindow {
                machine_ids: hosts
                    .iter()
                    .map(|(hostname, ip)| MachineId {
                        hostname: hostname.clone(),
                        ip: ip.clone(),
                    })
                    .collect(),
                unavailability: Unavailability {
                    start: UnavailabilityStart { nanoseconds: 1 },
                },
            }],
        };

        self.client
            .post(url.clone())
            .json(&schedule)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .context(RequestSnafu {
                url: url.to_string(),
            })?;

        Ok(())
    }
}
