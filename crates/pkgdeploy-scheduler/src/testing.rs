//! In-memory collaborators for scheduler tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pkgdeploy_config::DeploymentConfig;
use pkgdeploy_core::{
    AccessRights, AgentConnection, DeploymentJobRepo, Error, JobId, JobNotifier, JobSnapshot,
    JobStatus, ManagedNode, NodeContext, NodeDirectory, NodeId, PackageCatalog, PackageDetails,
    PackageId, Result, StoredJob, UserId,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::context::SchedulerContext;
use crate::scheduler::JobScheduler;

pub const SAMPLE_PACKAGE: PackageId = PackageId(3);
pub const AGENT_PACKAGE: PackageId = PackageId(4);

pub fn sample_package() -> PackageDetails {
    PackageDetails {
        id: SAMPLE_PACKAGE,
        package_type: "deb".to_string(),
        name: "collector".to_string(),
        version: "2.0".to_string(),
        platform: "Linux-x86_64".to_string(),
        file: "collector_2.0.deb".to_string(),
        command: "dpkg -i collector_2.0.deb".to_string(),
        description: "Metrics collector".to_string(),
    }
}

pub fn agent_package() -> PackageDetails {
    PackageDetails {
        id: AGENT_PACKAGE,
        package_type: "agent-installer".to_string(),
        name: "agent".to_string(),
        version: "5.1.0".to_string(),
        platform: "Linux-x86_64".to_string(),
        file: "agent-5.1.0.sh".to_string(),
        command: String::new(),
        description: "Agent upgrade".to_string(),
    }
}

/// A persisted sample-package job on node 1 owned by user 1.
pub fn stored_job(
    status: JobStatus,
    execution_time: DateTime<Utc>,
    completion_time: Option<DateTime<Utc>>,
) -> StoredJob {
    StoredJob {
        id: JobId::new(),
        node_id: NodeId(1),
        user_id: UserId(1),
        creation_time: execution_time.min(Utc::now()),
        execution_time,
        completion_time,
        status,
        error_message: String::new(),
        package: sample_package(),
    }
}

/// Poll `condition` until it holds. Panics after a minute of (possibly paused) time.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..6000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[derive(Default)]
pub struct MockRepo {
    rows: Mutex<HashMap<JobId, StoredJob>>,
    status_log: Mutex<Vec<(JobId, JobStatus)>>,
    audit: Mutex<Vec<StoredJob>>,
    deleted: Mutex<HashSet<JobId>>,
    created: AtomicUsize,
}

impl MockRepo {
    pub fn seed(&self, job: StoredJob) {
        self.rows.lock().unwrap().insert(job.id, job);
    }

    pub fn stored(&self, id: JobId) -> Option<StoredJob> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn status_updates(&self, id: JobId) -> Vec<JobStatus> {
        self.status_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, _)| *job == id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn audit_rows(&self) -> Vec<StoredJob> {
        self.audit.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> HashSet<JobId> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeploymentJobRepo for MockRepo {
    async fn create_record(&self, job: &StoredJob) -> Result<()> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.seed(job.clone());
        Ok(())
    }

    async fn update_execution_time(&self, id: JobId, execution_time: DateTime<Utc>) -> Result<()> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.execution_time = execution_time;
        }
        Ok(())
    }

    async fn update_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        self.status_log.lock().unwrap().push((id, status));
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.status = status;
        }
        Ok(())
    }

    async fn update_completion(
        &self,
        id: JobId,
        status: JobStatus,
        completion_time: DateTime<Utc>,
        error_message: &str,
    ) -> Result<()> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&id) {
            row.status = status;
            row.completion_time = Some(completion_time);
            row.error_message = error_message.to_string();
        }
        Ok(())
    }

    async fn append_audit_log(&self, job: &StoredJob) -> Result<()> {
        self.audit.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn delete_record(&self, id: JobId) -> Result<()> {
        self.rows.lock().unwrap().remove(&id);
        self.deleted.lock().unwrap().insert(id);
        Ok(())
    }

    async fn load_active_jobs(&self) -> Result<Vec<StoredJob>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }
}

/// Records every published snapshot with the time it was published.
#[derive(Default)]
pub struct MockNotifier {
    published: Mutex<Vec<(DateTime<Utc>, JobSnapshot)>>,
}

impl MockNotifier {
    pub fn statuses(&self, id: JobId) -> Vec<JobStatus> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, snap)| snap.id == id)
            .map(|(_, snap)| snap.status)
            .collect()
    }

    pub fn published_at(&self, id: JobId, status: JobStatus) -> Option<DateTime<Utc>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .find(|(_, snap)| snap.id == id && snap.status == status)
            .map(|(at, _)| *at)
    }
}

impl JobNotifier for MockNotifier {
    fn publish(&self, snapshot: JobSnapshot) {
        self.published.lock().unwrap().push((Utc::now(), snapshot));
    }
}

pub struct MockCatalog {
    packages: HashMap<PackageId, PackageDetails>,
}

impl Default for MockCatalog {
    fn default() -> Self {
        let packages = [sample_package(), agent_package()]
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        Self { packages }
    }
}

#[async_trait]
impl PackageCatalog for MockCatalog {
    async fn get_package(&self, id: PackageId) -> Result<Option<PackageDetails>> {
        Ok(self.packages.get(&id).cloned())
    }
}

/// Node directory granting every right except explicit denials.
#[derive(Default)]
pub struct MockDirectory {
    nodes: Mutex<HashMap<NodeId, Arc<MockNode>>>,
    denied: Mutex<HashSet<(UserId, NodeId)>>,
}

impl MockDirectory {
    pub fn add(&self, node: Arc<MockNode>) {
        self.nodes.lock().unwrap().insert(node.id, node);
    }

    pub fn deny(&self, user: UserId, node: NodeId) {
        self.denied.lock().unwrap().insert((user, node));
    }
}

impl NodeDirectory for MockDirectory {
    fn find_node(&self, id: NodeId) -> Option<Arc<dyn ManagedNode>> {
        let node = self.nodes.lock().unwrap().get(&id).cloned()?;
        Some(node as Arc<dyn ManagedNode>)
    }

    fn check_access(&self, user: UserId, node: NodeId, _rights: AccessRights) -> bool {
        !self.denied.lock().unwrap().contains(&(user, node))
    }
}

pub struct MockNode {
    id: NodeId,
    platform: String,
    local: AtomicBool,
    agent: Arc<MockAgent>,
    connect_plan: Mutex<VecDeque<bool>>,
    fail_after_plan: AtomicBool,
    connects: AtomicUsize,
    config_polls: AtomicUsize,
}

impl MockNode {
    pub fn new(id: u32, platform: &str) -> Self {
        Self {
            id: NodeId(id),
            platform: platform.to_string(),
            local: AtomicBool::new(false),
            agent: Arc::new(MockAgent::default()),
            connect_plan: Mutex::new(VecDeque::new()),
            fail_after_plan: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            config_polls: AtomicUsize::new(0),
        }
    }

    pub fn agent(&self) -> Arc<MockAgent> {
        self.agent.clone()
    }

    /// Outcomes of the next connection attempts, in order. Once used up,
    /// connections succeed unless [`MockNode::fail_connects_after_plan`] was called.
    pub fn plan_connects(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.connect_plan.lock().unwrap().extend(outcomes);
    }

    pub fn fail_connects_after_plan(&self) {
        self.fail_after_plan.store(true, Ordering::SeqCst);
    }

    pub fn set_local_management_node(&self) {
        self.local.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn config_polls(&self) -> usize {
        self.config_polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManagedNode for MockNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> String {
        format!("node-{}", self.id)
    }

    fn is_local_management_node(&self) -> bool {
        self.local.load(Ordering::SeqCst)
    }

    fn platform_name(&self) -> String {
        self.platform.clone()
    }

    fn supports_source_packages(&self) -> bool {
        false
    }

    fn context(&self) -> NodeContext {
        NodeContext {
            id: self.id,
            name: self.name(),
            platform: self.platform.clone(),
            agent_version: self.agent.version(),
            ..Default::default()
        }
    }

    async fn connect_to_agent(&self) -> Result<Box<dyn AgentConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let planned = self.connect_plan.lock().unwrap().pop_front();
        let ok = planned.unwrap_or(!self.fail_after_plan.load(Ordering::SeqCst));
        if !ok {
            return Err(Error::Agent("connection refused".to_string()));
        }
        Ok(Box::new(MockConnection(self.agent.clone())))
    }

    fn request_configuration_poll(&self) {
        self.config_polls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Agent state shared by every connection to one node.
pub struct MockAgent {
    version: Mutex<String>,
    version_after_upgrade: Mutex<Option<String>>,
    fail_upload: AtomicBool,
    fail_install: AtomicBool,
    upload_delay: Mutex<Duration>,
    uploads: Mutex<Vec<String>>,
    installs: Mutex<Vec<String>>,
    upgrades: AtomicUsize,
    disconnects: AtomicUsize,
}

impl Default for MockAgent {
    fn default() -> Self {
        Self {
            version: Mutex::new("5.0.0".to_string()),
            version_after_upgrade: Mutex::new(None),
            fail_upload: AtomicBool::new(false),
            fail_install: AtomicBool::new(false),
            upload_delay: Mutex::new(Duration::ZERO),
            uploads: Mutex::new(Vec::new()),
            installs: Mutex::new(Vec::new()),
            upgrades: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }
}

impl MockAgent {
    pub fn version(&self) -> String {
        self.version.lock().unwrap().clone()
    }

    pub fn set_version_after_upgrade(&self, version: &str) {
        *self.version_after_upgrade.lock().unwrap() = Some(version.to_string());
    }

    pub fn fail_upload(&self) {
        self.fail_upload.store(true, Ordering::SeqCst);
    }

    pub fn fail_install(&self) {
        self.fail_install.store(true, Ordering::SeqCst);
    }

    pub fn set_upload_delay(&self, delay: Duration) {
        *self.upload_delay.lock().unwrap() = delay;
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    /// One "file type command" entry per install call.
    pub fn installs(&self) -> Vec<String> {
        self.installs.lock().unwrap().clone()
    }

    pub fn upgrades(&self) -> usize {
        self.upgrades.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

struct MockConnection(Arc<MockAgent>);

#[async_trait]
impl AgentConnection for MockConnection {
    async fn upload_file(&self, _local_path: &Path, remote_name: &str) -> Result<()> {
        let delay = *self.0.upload_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.0.fail_upload.load(Ordering::SeqCst) {
            return Err(Error::Agent("file transfer aborted".to_string()));
        }
        self.0.uploads.lock().unwrap().push(remote_name.to_string());
        Ok(())
    }

    async fn install_package(
        &self,
        file: &str,
        package_type: &str,
        command: &str,
        _timeout: Duration,
    ) -> Result<()> {
        if self.0.fail_install.load(Ordering::SeqCst) {
            return Err(Error::Agent("installer exited with code 1".to_string()));
        }
        self.0
            .installs
            .lock()
            .unwrap()
            .push(format!("{} {} {}", file, package_type, command));
        Ok(())
    }

    async fn start_upgrade(&self, _file: &str) -> Result<()> {
        self.0.upgrades.fetch_add(1, Ordering::SeqCst);
        if let Some(version) = self.0.version_after_upgrade.lock().unwrap().clone() {
            *self.0.version.lock().unwrap() = version;
        }
        Ok(())
    }

    async fn get_parameter(&self, name: &str) -> Result<String> {
        match name {
            "Agent.Version" => Ok(self.0.version()),
            other => Err(Error::NotFound(format!("parameter {}", other))),
        }
    }

    async fn disconnect(&self) {
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock collaborators wired into a scheduler context.
pub struct Harness {
    pub repo: Arc<MockRepo>,
    pub notifier: Arc<MockNotifier>,
    pub catalog: Arc<MockCatalog>,
    pub directory: Arc<MockDirectory>,
    ctx: Arc<SchedulerContext>,
}

impl Harness {
    pub fn new() -> Self {
        let repo = Arc::new(MockRepo::default());
        let notifier = Arc::new(MockNotifier::default());
        let directory = Arc::new(MockDirectory::default());
        let ctx = Arc::new(SchedulerContext::new(
            DeploymentConfig::default().normalized(),
            repo.clone(),
            notifier.clone(),
            directory.clone(),
        ));
        Self {
            repo,
            notifier,
            catalog: Arc::new(MockCatalog::default()),
            directory,
            ctx,
        }
    }

    pub fn config(&self) -> DeploymentConfig {
        DeploymentConfig::default()
    }

    /// Context used when driving executors directly.
    pub(crate) fn context(&self) -> Arc<SchedulerContext> {
        self.ctx.clone()
    }

    pub fn scheduler(&self) -> Arc<JobScheduler> {
        self.scheduler_with(self.config())
    }

    pub fn scheduler_with(&self, config: DeploymentConfig) -> Arc<JobScheduler> {
        Arc::new(JobScheduler::new(
            config,
            self.repo.clone(),
            self.catalog.clone(),
            self.notifier.clone(),
            self.directory.clone(),
        ))
    }

    pub fn add_node(&self, id: u32, platform: &str) -> Arc<MockNode> {
        let node = Arc::new(MockNode::new(id, platform));
        self.directory.add(node.clone());
        node
    }
}
