// Copyright (c) 2024 The devcg-manager Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashMap;
use std::sync::Arc;

use slog::Logger;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;
use tracing::instrument;

use crate::config::ManagerConfig;
use crate::controller::DeviceController;
use crate::diff::{apply_diff, CgroupDeviceAccess};
use crate::entry::{to_entries, Entry, NonWildcardEntry};
use crate::validate;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid device access policy: {0}")]
    PolicyConflict(#[from] validate::Error),
    #[error("failed to commit cgroup device access changes: {0:#}")]
    CommitFailed(#[source] anyhow::Error),
    #[error("device manager is stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, Error>;

enum Command {
    Configure {
        cgroup: String,
        allow: Vec<Entry>,
        deny: Vec<NonWildcardEntry>,
        reply: oneshot::Sender<Result<()>>,
    },
    Reconfigure {
        cgroup: String,
        additions: Vec<NonWildcardEntry>,
        removals: Vec<NonWildcardEntry>,
        reply: oneshot::Sender<Result<()>>,
    },
    StateAll {
        reply: oneshot::Sender<HashMap<String, CgroupDeviceAccess>>,
    },
    StateOf {
        cgroup: String,
        reply: oneshot::Sender<CgroupDeviceAccess>,
    },
}

/// Handle to the device access manager task.
///
/// In cgroups v2 device access is mediated by eBPF programs rather than
/// control files, so a cgroup's device access state cannot be read back
/// from the kernel: the manager tracks the intended state per cgroup and
/// rebuilds the full installable rule set from it on every change.
///
/// All operations are funneled through a single task and execute to
/// completion in submission order; the in-memory state is the source of
/// truth and callers only ever receive copies of it. Handles are cheap to
/// clone and share one task.
#[derive(Clone, Debug)]
pub struct DeviceManager {
    sender: Sender<Command>,
}

impl DeviceManager {
    /// Spawns the manager task. Must be called from within a tokio
    /// runtime.
    #[instrument]
    pub fn new(
        logger: &Logger,
        controller: Arc<dyn DeviceController>,
        config: &ManagerConfig,
    ) -> DeviceManager {
        let logger = logger.new(o!("subsystem" => "device-manager"));
        let (sender, receiver) = channel(config.queue_size);

        info!(logger, "starting device manager";
            "queue_size" => config.queue_size,
            "state_dir" => format!("{:?}", config.state_dir),
        );

        let task = ManagerTask {
            logger,
            controller,
            state: HashMap::new(),
        };
        tokio::spawn(task.run(receiver));

        DeviceManager { sender }
    }

    /// Installs the initial device access state for `cgroup`, replacing
    /// any state previously held for it, and commits it to the
    /// controller. Wildcards are allowed in `allow` but not in `deny`.
    #[instrument]
    pub async fn configure(
        &self,
        cgroup: &str,
        allow: Vec<Entry>,
        deny: Vec<NonWildcardEntry>,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Configure {
            cgroup: cgroup.to_string(),
            allow,
            deny,
            reply,
        })
        .await?;

        response.await.map_err(|_| Error::Stopped)?
    }

    /// Adjusts the device access state for `cgroup` incrementally:
    /// `additions` name device accesses to grant, `removals` accesses to
    /// revoke. A cgroup that was never configured starts from the empty
    /// state.
    #[instrument]
    pub async fn reconfigure(
        &self,
        cgroup: &str,
        additions: Vec<NonWildcardEntry>,
        removals: Vec<NonWildcardEntry>,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Reconfigure {
            cgroup: cgroup.to_string(),
            additions,
            removals,
            reply,
        })
        .await?;

        response.await.map_err(|_| Error::Stopped)?
    }

    /// A snapshot of the device access state of every tracked cgroup.
    #[instrument]
    pub async fn state_all(&self) -> Result<HashMap<String, CgroupDeviceAccess>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::StateAll { reply }).await?;

        response.await.map_err(|_| Error::Stopped)
    }

    /// A snapshot of the device access state of `cgroup`. A cgroup the
    /// manager does not track yields the empty state.
    #[instrument]
    pub async fn state_of(&self, cgroup: &str) -> Result<CgroupDeviceAccess> {
        let (reply, response) = oneshot::channel();
        self.send(Command::StateOf {
            cgroup: cgroup.to_string(),
            reply,
        })
        .await?;

        response.await.map_err(|_| Error::Stopped)
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.sender.send(cmd).await.map_err(|_| Error::Stopped)
    }
}

struct ManagerTask {
    logger: Logger,
    controller: Arc<dyn DeviceController>,
    // TODO: checkpoint this map under ManagerConfig::state_dir so device
    // access state survives an agent restart.
    state: HashMap<String, CgroupDeviceAccess>,
}

impl ManagerTask {
    async fn run(mut self, mut commands: Receiver<Command>) {
        // Replies are best effort: a caller that dropped its reply handle
        // does not abort the operation it queued.
        while let Some(cmd) = commands.recv().await {
            match cmd {
                Command::Configure {
                    cgroup,
                    allow,
                    deny,
                    reply,
                } => {
                    let _ = reply.send(self.configure(&cgroup, allow, deny));
                }
                Command::Reconfigure {
                    cgroup,
                    additions,
                    removals,
                    reply,
                } => {
                    let _ = reply.send(self.reconfigure(&cgroup, additions, removals));
                }
                Command::StateAll { reply } => {
                    let _ = reply.send(self.state.clone());
                }
                Command::StateOf { cgroup, reply } => {
                    let _ = reply.send(self.state.get(&cgroup).cloned().unwrap_or_default());
                }
            }
        }

        debug!(self.logger, "command channel closed, stopping");
    }

    fn configure(
        &mut self,
        cgroup: &str,
        allow: Vec<Entry>,
        deny: Vec<NonWildcardEntry>,
    ) -> Result<()> {
        let deny = to_entries(&deny);
        validate::check_configure(&allow, &deny)?;

        info!(self.logger, "configure device access";
            "cgroup" => cgroup,
            "allow" => allow.len(),
            "deny" => deny.len(),
        );

        self.state.insert(
            cgroup.to_string(),
            CgroupDeviceAccess {
                allow_list: allow,
                deny_list: deny,
            },
        );

        self.commit(cgroup)
    }

    fn reconfigure(
        &mut self,
        cgroup: &str,
        additions: Vec<NonWildcardEntry>,
        removals: Vec<NonWildcardEntry>,
    ) -> Result<()> {
        validate::check_reconfigure(&to_entries(&additions), &to_entries(&removals))?;

        info!(self.logger, "reconfigure device access";
            "cgroup" => cgroup,
            "additions" => additions.len(),
            "removals" => removals.len(),
        );

        let old_state = self.state.get(cgroup).cloned().unwrap_or_default();
        self.state.insert(
            cgroup.to_string(),
            apply_diff(&old_state, &additions, &removals),
        );

        self.commit(cgroup)
    }

    // The in-memory state is not rolled back when the commit fails: the
    // container is destroyed on a failed device access update, taking the
    // cgroup and its state entry with it.
    fn commit(&self, cgroup: &str) -> Result<()> {
        // Present by construction: commit always follows an insert for
        // this cgroup.
        let access = &self.state[cgroup];

        self.controller
            .apply(cgroup, &access.allow_list, &access.deny_list)
            .map_err(Error::CommitFailed)
    }
}
