//! The orchestrator sequences the subsystems for each user-facing operation.
//!
//! `manage` runs load, validate, place, and save while holding both the
//! in-process registry guard and the registry file lock, so two concurrent
//! calls can never both start from the same registry. The service restart
//! happens after the lock is released. Its failure is reported, never rolled
//! back.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::display::{self, DisplayModel};
use crate::installed::{self, InstalledModels, OllamaInstalled};
use crate::provision::{self, ProgressSink, ProvisionHandle, Provisioned, PullCommand, Supervisor};
use crate::registry::entry::BackendSpec;
use crate::registry::lock::DEFAULT_LOCK_TIMEOUT;
use crate::registry::placement::{Operation, PlacementPolicy};
use crate::registry::store::RegistryStore;
use crate::registry::{self, Registry};
use crate::restart::{RestartCommand, RestartCoordinator, RestartFailure, Restarted};

pub(crate) const EXIT_SUCCESS: i32 = 0;
pub(crate) const EXIT_VALIDATION: i32 = 2;
pub(crate) const EXIT_NOT_FOUND: i32 = 3;
pub(crate) const EXIT_DUPLICATE: i32 = 4;
pub(crate) const EXIT_WRITE_FAILURE: i32 = 5;
pub(crate) const EXIT_PROVISIONING: i32 = 6;
pub(crate) const EXIT_TIMEOUT: i32 = 7;
pub(crate) const EXIT_CANCELLED: i32 = 8;
pub(crate) const EXIT_CONFIGURATION: i32 = 9;
/// Only used when a failed restart is asked to fail the command.
pub(crate) const EXIT_RESTART_FAILURE: i32 = 10;

#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error(transparent)]
    Registry(#[from] registry::Error),
    #[error(transparent)]
    Provision(#[from] provision::Error),
    #[error(transparent)]
    Installed(#[from] installed::Error),
}

impl Error {
    pub(crate) fn exit_code(&self) -> i32 {
        use registry::Error as R;

        match self {
            Error::Registry(err) => match err {
                R::Validation(_) => EXIT_VALIDATION,
                R::ConfigNotFound(_) | R::ModelNotFound(_) => EXIT_NOT_FOUND,
                R::DuplicateModel(_) => EXIT_DUPLICATE,
                R::ConfigWriteError(..) => EXIT_WRITE_FAILURE,
                R::ConfigUnreadable(..)
                | R::ConfigParseError { .. }
                | R::LockTimeout(_)
                | R::LockFailed(..) => EXIT_CONFIGURATION,
            },
            Error::Provision(err) => match err {
                provision::Error::Timeout { .. } => EXIT_TIMEOUT,
                provision::Error::Cancelled { .. } => EXIT_CANCELLED,
                provision::Error::Launch { .. }
                | provision::Error::SubprocessFailure { .. }
                | provision::Error::Wait(_)
                | provision::Error::Aborted(_) => EXIT_PROVISIONING,
            },
            Error::Installed(_) => EXIT_CONFIGURATION,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ManageRequest {
    pub name: String,
    /// Present to add an entry, absent to switch to an existing one.
    pub backend_spec: Option<String>,
    pub force: bool,
    pub no_restart: bool,
}

#[derive(Debug)]
pub(crate) enum RestartOutcome {
    Restarted(Restarted),
    /// The caller asked not to restart; `remedy` applies the change by hand.
    Skipped { remedy: String },
    Failed(RestartFailure),
}

#[derive(Debug)]
pub(crate) struct ManageReport {
    pub operation: Operation,
    /// The registry as persisted.
    pub registry: Registry,
    pub restart: RestartOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AddRequest {
    pub identifier: String,
    /// Defaults to the last `/` component of the identifier.
    pub name: Option<String>,
    pub skip_download: bool,
    pub force: bool,
    pub no_restart: bool,
}

impl AddRequest {
    pub(crate) fn name(&self) -> &str {
        match &self.name {
            Some(name) => name.as_str(),
            None => default_name(&self.identifier),
        }
    }
}

fn default_name(identifier: &str) -> &str {
    identifier.rsplit('/').next().unwrap_or(identifier)
}

/// Whether the engine lists a model after provisioning. Advisory only.
#[derive(Debug)]
pub(crate) enum Verification {
    Found(String),
    Missing,
    Unknown(installed::Error),
}

#[derive(Debug)]
pub(crate) struct AddReport {
    pub provisioned: Option<Provisioned>,
    pub verification: Option<Verification>,
    pub manage: ManageReport,
}

#[derive(Debug)]
pub(crate) struct DisplayListing {
    pub models: Vec<DisplayModel>,
    /// Set when installed models could not be listed and only registry
    /// entries are shown.
    pub installed_error: Option<installed::Error>,
}

pub(crate) struct Orchestrator {
    store: RegistryStore,
    policy: PlacementPolicy,
    supervisor: Supervisor,
    restarter: RestartCoordinator,
    installed: Arc<dyn InstalledModels>,
    registry_guard: Arc<Mutex<()>>,
    service: String,
    lock_timeout: Duration,
    provision_timeout: Duration,
}

impl Orchestrator {
    pub(crate) fn new(
        store: RegistryStore,
        policy: PlacementPolicy,
        supervisor: Supervisor,
        restarter: RestartCoordinator,
        installed: Arc<dyn InstalledModels>,
        service: &str,
    ) -> Orchestrator {
        Orchestrator {
            store,
            policy,
            supervisor,
            restarter,
            installed,
            registry_guard: Arc::new(Mutex::new(())),
            service: service.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            provision_timeout: provision::DEFAULT_DEADLINE,
        }
    }

    pub(crate) fn from_config(config: &Config, sink: Arc<dyn ProgressSink>) -> Result<Orchestrator, Error> {
        let supervisor = Supervisor::new(
            PullCommand::new(&config.provisioning.program, &config.provisioning.args),
            config.provision_grace(),
            sink,
        );

        let restarter = RestartCoordinator::new(
            RestartCommand::new(&config.restart.program, &config.restart.args),
            config.restart_timeout(),
        );

        let installed = OllamaInstalled::with_api_base(config.local.api_base.as_str())?;

        Ok(Orchestrator::new(
            RegistryStore::new(&config.registry_path),
            PlacementPolicy::new(&config.local.endpoint),
            supervisor,
            restarter,
            Arc::new(installed),
            &config.restart.service,
        )
        .with_lock_timeout(config.lock_timeout())
        .with_provision_timeout(config.provision_timeout()))
    }

    pub(crate) fn with_lock_timeout(mut self, timeout: Duration) -> Orchestrator {
        self.lock_timeout = timeout;
        self
    }

    pub(crate) fn with_provision_timeout(mut self, timeout: Duration) -> Orchestrator {
        self.provision_timeout = timeout;
        self
    }

    pub(crate) fn provision_command(&self, identifier: &str) -> String {
        self.supervisor.command().display(identifier)
    }

    /// Pulls `identifier` and waits for the result. The registry is not
    /// touched.
    pub(crate) async fn provision(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> Result<Provisioned, Error> {
        let provisioned = self
            .supervisor
            .provision(identifier, self.provision_timeout, cancel)
            .await?;

        Ok(provisioned)
    }

    /// Pulls `identifier` in a detached task.
    pub(crate) fn spawn_provision(&self, identifier: &str) -> ProvisionHandle {
        self.supervisor.spawn(identifier, self.provision_timeout)
    }

    /// Looks for `identifier`, or its last path component, among installed models.
    pub(crate) async fn verify_installed(&self, identifier: &str) -> Verification {
        let installed = match self.installed.list_installed().await {
            Ok(installed) => installed,
            Err(err) => return Verification::Unknown(err),
        };

        let short = default_name(identifier);

        match installed
            .iter()
            .find(|m| m.matches(identifier) || m.matches(short))
        {
            Some(model) => Verification::Found(model.name.clone()),
            None => Verification::Missing,
        }
    }

    pub(crate) async fn manage(&self, request: &ManageRequest) -> Result<ManageReport, Error> {
        let operation = Operation::resolve(&request.name, request.backend_spec.as_deref(), request.force);

        let registry = self.update_registry(&operation).await?;

        let restart = self.refresh(request.no_restart).await;

        Ok(ManageReport {
            operation,
            registry,
            restart,
        })
    }

    /// Provisions the identifier unless told not to, then registers it as a
    /// local entry. A failed pull leaves the registry alone.
    pub(crate) async fn add(
        &self,
        request: &AddRequest,
        cancel: &CancellationToken,
    ) -> Result<AddReport, Error> {
        let backend = BackendSpec::local(&request.identifier).map_err(registry::Error::from)?;
        let manage = ManageRequest {
            name: request.name().to_string(),
            backend_spec: Some(backend.to_string()),
            force: request.force,
            no_restart: request.no_restart,
        };

        // Catch the obvious mistakes before a long pull. The registry is
        // checked again under the lock when the entry is added.
        Operation::resolve(&manage.name, manage.backend_spec.as_deref(), manage.force)
            .validate()
            .map_err(registry::Error::from)?;

        if !request.force && self.store.load()?.get(&manage.name).is_some() {
            return Err(registry::Error::DuplicateModel(manage.name).into());
        }

        let (provisioned, verification) = if request.skip_download {
            (None, None)
        } else {
            let provisioned = self.provision(&request.identifier, cancel).await?;
            let verification = self.verify_installed(&request.identifier).await;

            (Some(provisioned), Some(verification))
        };

        let manage = self.manage(&manage).await?;

        Ok(AddReport {
            provisioned,
            verification,
            manage,
        })
    }

    /// The registry as it is on disk now.
    pub(crate) fn get_registry(&self) -> Result<Registry, Error> {
        Ok(self.store.load()?)
    }

    pub(crate) async fn list_display_models(&self) -> Result<DisplayListing, Error> {
        let registry = self.store.load()?;

        let (installed, installed_error) = match self.installed.list_installed().await {
            Ok(installed) => (installed, None),
            Err(err) => {
                tracing::warn!(kind = ?err.kind(), "listing installed models failed: {}", err);
                (Vec::new(), Some(err))
            }
        };

        Ok(DisplayListing {
            models: display::merge(&installed, &registry),
            installed_error,
        })
    }

    /// Load, place, and save under the registry guard and file lock.
    async fn update_registry(&self, operation: &Operation) -> Result<Registry, Error> {
        let _guard = self.registry_guard.lock().await;

        // Without this, a missing directory would surface as a lock failure.
        if !self.store.path().exists() {
            return Err(registry::Error::ConfigNotFound(self.store.path().to_path_buf()).into());
        }

        let lock = self.store.lock(self.lock_timeout).await?;

        tracing::debug!(lock = %lock.path().display(), "holding registry lock");

        let registry = self.store.load()?;

        operation.validate().map_err(registry::Error::from)?;

        let placed = self.policy.apply(registry, operation)?;

        self.store.save(&placed)?;

        tracing::info!(
            %operation,
            head = placed.head().map(|e| e.name.as_str()).unwrap_or(""),
            entries = placed.len(),
            "registry updated"
        );

        Ok(placed)
    }

    async fn refresh(&self, no_restart: bool) -> RestartOutcome {
        if no_restart {
            return RestartOutcome::Skipped {
                remedy: self.restarter.remedy(&self.service),
            };
        }

        match self.restarter.restart(&self.service).await {
            Ok(restarted) => RestartOutcome::Restarted(restarted),
            Err(failure) => RestartOutcome::Failed(failure),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::installed::{ErrorKind, InstalledModel};
    use crate::provision::tests::shell_supervisor;
    use crate::provision::DEFAULT_GRACE;
    use crate::registry::testing::LOCAL_ENDPOINT;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const SAMPLE: &str = "model_list:
  - model_name: Phi3
    litellm_params:
      model: ollama/phi3
      api_base: http://ollama:11434
  - model_name: GPT4
    litellm_params:
      model: openai/gpt-4
      api_key: os.environ/OPENAI_API_KEY
litellm_settings:
  drop_params: true
";

    struct FakeInstalled {
        models: Option<Vec<InstalledModel>>,
    }

    #[async_trait]
    impl InstalledModels for FakeInstalled {
        async fn list_installed(&self) -> Result<Vec<InstalledModel>, installed::Error> {
            match &self.models {
                Some(models) => Ok(models.clone()),
                None => Err(installed::Error::from_kind(ErrorKind::Connection)),
            }
        }
    }

    fn installed(names: &[&str]) -> Arc<dyn InstalledModels> {
        Arc::new(FakeInstalled {
            models: Some(
                names
                    .iter()
                    .map(|n| InstalledModel {
                        name: n.to_string(),
                        size: 1_000_000,
                        modified: "2024-05-20T10:21:47Z".to_string(),
                    })
                    .collect(),
            ),
        })
    }

    fn shell_restarter(script: &str) -> RestartCoordinator {
        RestartCoordinator::new(
            RestartCommand::new("sh", &["-c".into(), script.into(), "sh".into()]),
            Duration::from_secs(5),
        )
    }

    struct Fixture {
        _dir: TempDir,
        path: PathBuf,
    }

    impl Fixture {
        fn new(contents: &str) -> Fixture {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("config.yaml");

            std::fs::write(&path, contents).unwrap();

            Fixture { _dir: dir, path }
        }

        fn orchestrator(&self, pull: &str, restart: &str, listing: Arc<dyn InstalledModels>) -> Orchestrator {
            let (supervisor, _) = shell_supervisor(pull, DEFAULT_GRACE);

            Orchestrator::new(
                RegistryStore::new(&self.path),
                PlacementPolicy::new(LOCAL_ENDPOINT),
                supervisor,
                shell_restarter(restart),
                listing,
                "litellm",
            )
            .with_lock_timeout(Duration::from_secs(5))
            .with_provision_timeout(Duration::from_secs(10))
        }

        fn default_orchestrator(&self) -> Orchestrator {
            self.orchestrator("echo \"pulled $1\"", "echo \"restarted $1\"", installed(&[]))
        }

        fn contents(&self) -> String {
            std::fs::read_to_string(&self.path).unwrap()
        }

        fn names(&self) -> Vec<String> {
            load_names(&self.path)
        }
    }

    fn load_names(path: &Path) -> Vec<String> {
        RegistryStore::new(path)
            .load()
            .unwrap()
            .names()
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn add(name: &str, spec: &str) -> ManageRequest {
        ManageRequest {
            name: name.to_string(),
            backend_spec: Some(spec.to_string()),
            ..ManageRequest::default()
        }
    }

    fn switch_to(name: &str) -> ManageRequest {
        ManageRequest {
            name: name.to_string(),
            ..ManageRequest::default()
        }
    }

    #[tokio::test]
    async fn test_add_to_empty_registry() {
        let fixture = Fixture::new("");

        let report = fixture
            .default_orchestrator()
            .manage(&add("Phi3", "ollama/phi3"))
            .await
            .unwrap();

        assert_eq!(report.registry.names(), ["Phi3"]);

        match report.restart {
            RestartOutcome::Restarted(restarted) => {
                assert_eq!(restarted.stdout, "restarted litellm")
            }
            other => panic!("expected a restart, got {:?}", other),
        }

        let written = fixture.contents();
        assert!(written.contains("model: ollama/phi3"));
        assert!(written.contains("api_base: http://ollama:11434"));
    }

    #[tokio::test]
    async fn test_switch_persists_new_head() {
        let fixture = Fixture::new(SAMPLE);

        fixture
            .default_orchestrator()
            .manage(&switch_to("GPT4"))
            .await
            .unwrap();

        assert_eq!(fixture.names(), ["GPT4", "Phi3"]);
        assert!(fixture.contents().contains("drop_params: true"));
        assert!(fixture.contents().contains("api_key: os.environ/OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_unknown_model_leaves_file_untouched() {
        let fixture = Fixture::new(SAMPLE);

        let err = fixture
            .default_orchestrator()
            .manage(&switch_to("NoSuchModel"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Registry(registry::Error::ModelNotFound(_))));
        assert_eq!(err.exit_code(), EXIT_NOT_FOUND);
        assert_eq!(fixture.contents(), SAMPLE);
    }

    #[tokio::test]
    async fn test_duplicate_leaves_file_untouched() {
        let fixture = Fixture::new(SAMPLE);

        let err = fixture
            .default_orchestrator()
            .manage(&add("Phi3", "ollama/phi3b"))
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), EXIT_DUPLICATE);
        assert_eq!(fixture.contents(), SAMPLE);
    }

    #[tokio::test]
    async fn test_malformed_spec_is_validation_error() {
        let fixture = Fixture::new(SAMPLE);

        let err = fixture
            .default_orchestrator()
            .manage(&add("Broken", "phi3"))
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), EXIT_VALIDATION);
        assert_eq!(fixture.contents(), SAMPLE);
    }

    #[tokio::test]
    async fn test_missing_registry() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture {
            path: dir.path().join("missing").join("config.yaml"),
            _dir: dir,
        };

        let err = fixture
            .default_orchestrator()
            .manage(&switch_to("Phi3"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Registry(registry::Error::ConfigNotFound(_))));
        assert_eq!(err.exit_code(), EXIT_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_no_restart_reports_remedy() {
        let fixture = Fixture::new(SAMPLE);

        let report = fixture
            .default_orchestrator()
            .manage(&ManageRequest {
                no_restart: true,
                ..add("Mistral", "ollama/mistral")
            })
            .await
            .unwrap();

        match report.restart {
            RestartOutcome::Skipped { remedy } => assert!(remedy.ends_with("litellm")),
            other => panic!("expected a skipped restart, got {:?}", other),
        }

        assert_eq!(fixture.names(), ["Mistral", "GPT4"]);
    }

    #[tokio::test]
    async fn test_restart_failure_keeps_registry_change() {
        let fixture = Fixture::new(SAMPLE);
        let orchestrator = fixture.orchestrator("true", "echo 'service not running' 1>&2; exit 1", installed(&[]));

        let report = orchestrator.manage(&switch_to("GPT4")).await.unwrap();

        match report.restart {
            RestartOutcome::Failed(failure) => {
                assert!(failure.detail.contains("service not running"));
                assert!(failure.remedy.ends_with("litellm"));
            }
            other => panic!("expected a failed restart, got {:?}", other),
        }

        assert_eq!(fixture.names(), ["GPT4", "Phi3"]);
    }

    #[tokio::test]
    async fn test_concurrent_manage_loses_no_update() {
        let fixture = Fixture::new(SAMPLE);
        let orchestrator = fixture.default_orchestrator();

        let claude = add("Claude", "anthropic/claude-3-haiku");
        let gemini = add("Gemini", "gemini/gemini-pro");
        let mixtral = add("Mixtral", "groq/mixtral-8x7b");

        let (a, b, c) = tokio::join!(
            orchestrator.manage(&claude),
            orchestrator.manage(&gemini),
            orchestrator.manage(&mixtral),
        );

        a.unwrap();
        b.unwrap();
        c.unwrap();

        let mut names = fixture.names();
        names.sort();

        assert_eq!(names, ["Claude", "GPT4", "Gemini", "Mixtral", "Phi3"]);
    }

    #[tokio::test]
    async fn test_instances_sharing_a_file_lose_no_update() {
        let fixture = Fixture::new(SAMPLE);
        let first = fixture.default_orchestrator();
        let second = fixture.default_orchestrator();

        let claude = add("Claude", "anthropic/claude-3-haiku");
        let gemini = add("Gemini", "gemini/gemini-pro");

        let (a, b) = tokio::join!(first.manage(&claude), second.manage(&gemini));

        a.unwrap();
        b.unwrap();

        let names = fixture.names();
        assert!(names.contains(&"Claude".to_string()));
        assert!(names.contains(&"Gemini".to_string()));
    }

    #[tokio::test]
    async fn test_held_lock_times_out() {
        let fixture = Fixture::new(SAMPLE);
        let _held = RegistryStore::new(&fixture.path)
            .lock(Duration::from_secs(1))
            .await
            .unwrap();

        let err = fixture
            .default_orchestrator()
            .with_lock_timeout(Duration::from_millis(200))
            .manage(&switch_to("GPT4"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Registry(registry::Error::LockTimeout(_))));
        assert_eq!(err.exit_code(), EXIT_CONFIGURATION);
        assert_eq!(fixture.contents(), SAMPLE);
    }

    #[tokio::test]
    async fn test_lock_file_left_by_dead_owner_is_reused() {
        let fixture = Fixture::new(SAMPLE);
        std::fs::write(crate::registry::lock::lock_path(&fixture.path), "999999\n").unwrap();

        fixture
            .default_orchestrator()
            .with_lock_timeout(Duration::from_millis(200))
            .manage(&switch_to("GPT4"))
            .await
            .unwrap();

        assert_eq!(fixture.names(), ["GPT4", "Phi3"]);
    }

    #[tokio::test]
    async fn test_unwritable_registry_is_left_intact() {
        use std::os::unix::fs::PermissionsExt;

        let fixture = Fixture::new(SAMPLE);
        let dir = fixture.path.parent().unwrap().to_path_buf();

        // The lock file must already exist, as it would after any earlier update.
        std::fs::write(crate::registry::lock::lock_path(&fixture.path), "").unwrap();
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o500)).unwrap();

        // Permissions do not bind root.
        if std::fs::write(dir.join("writable"), "").is_ok() {
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).unwrap();
            return;
        }

        let result = fixture
            .default_orchestrator()
            .manage(&add("Mistral", "ollama/mistral"))
            .await;

        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).unwrap();

        let err = result.unwrap_err();
        assert!(matches!(err, Error::Registry(registry::Error::ConfigWriteError(..))));
        assert_eq!(err.exit_code(), EXIT_WRITE_FAILURE);
        assert_eq!(fixture.contents(), SAMPLE);
    }

    #[tokio::test]
    async fn test_provision_does_not_touch_registry() {
        let fixture = Fixture::new(SAMPLE);

        let provisioned = fixture
            .default_orchestrator()
            .provision("mistral", &CancellationToken::new())
            .await
            .unwrap();

        assert!(provisioned.log.contains("pulled mistral"));
        assert_eq!(fixture.contents(), SAMPLE);
    }

    #[tokio::test]
    async fn test_provision_failure_exit_codes() {
        let fixture = Fixture::new(SAMPLE);

        let failed = fixture
            .orchestrator("exit 1", "true", installed(&[]))
            .provision("mistral", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(failed.exit_code(), EXIT_PROVISIONING);

        let timed_out = fixture
            .orchestrator("exec sleep 30", "true", installed(&[]))
            .with_provision_timeout(Duration::from_millis(200))
            .provision("mistral", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(timed_out.exit_code(), EXIT_TIMEOUT);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let cancelled = fixture
            .orchestrator("exec sleep 30", "true", installed(&[]))
            .provision("mistral", &cancel)
            .await
            .unwrap_err();
        assert_eq!(cancelled.exit_code(), EXIT_CANCELLED);
    }

    #[tokio::test]
    async fn test_spawned_provision_can_be_awaited() {
        let fixture = Fixture::new(SAMPLE);

        let handle = fixture.default_orchestrator().spawn_provision("mistral");

        let provisioned = handle.wait().await.unwrap();
        assert_eq!(provisioned.identifier, "mistral");
    }

    #[tokio::test]
    async fn test_add_provisions_then_registers() {
        let fixture = Fixture::new(SAMPLE);
        let orchestrator = fixture.orchestrator(
            "echo \"pulled $1\"",
            "true",
            installed(&["phi3:latest", "Llama-3-ELYZA-JP-8B-GGUF:latest"]),
        );

        let request = AddRequest {
            identifier: "hf.co/elyza/Llama-3-ELYZA-JP-8B-GGUF".to_string(),
            ..AddRequest::default()
        };

        let report = orchestrator.add(&request, &CancellationToken::new()).await.unwrap();

        assert!(report.provisioned.unwrap().log.contains("pulled hf.co/elyza"));
        assert!(matches!(report.verification, Some(Verification::Found(_))));
        assert_eq!(fixture.names(), ["Llama-3-ELYZA-JP-8B-GGUF", "GPT4"]);
        assert!(fixture
            .contents()
            .contains("model: ollama/hf.co/elyza/Llama-3-ELYZA-JP-8B-GGUF"));
    }

    #[tokio::test]
    async fn test_failed_pull_adds_nothing() {
        let fixture = Fixture::new(SAMPLE);

        let request = AddRequest {
            identifier: "nosuchmodel".to_string(),
            ..AddRequest::default()
        };

        let err = fixture
            .orchestrator("echo 'pull model manifest: file does not exist' 1>&2; exit 1", "true", installed(&[]))
            .add(&request, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), EXIT_PROVISIONING);
        assert_eq!(fixture.contents(), SAMPLE);
    }

    #[tokio::test]
    async fn test_add_duplicate_is_rejected_before_pulling() {
        let fixture = Fixture::new(SAMPLE);

        let request = AddRequest {
            identifier: "phi3".to_string(),
            name: Some("Phi3".to_string()),
            ..AddRequest::default()
        };

        // A pull would fail, so only the early check can produce a duplicate error.
        let err = fixture
            .orchestrator("exit 1", "true", installed(&[]))
            .add(&request, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), EXIT_DUPLICATE);
    }

    #[tokio::test]
    async fn test_add_skip_download_and_missing_verification() {
        let fixture = Fixture::new(SAMPLE);

        let request = AddRequest {
            identifier: "mistral".to_string(),
            skip_download: true,
            no_restart: true,
            ..AddRequest::default()
        };

        let report = fixture
            .orchestrator("exit 1", "true", installed(&[]))
            .add(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.provisioned.is_none());
        assert!(report.verification.is_none());
        assert_eq!(fixture.names(), ["mistral", "GPT4"]);

        let verification = fixture
            .default_orchestrator()
            .verify_installed("mistral")
            .await;
        assert!(matches!(verification, Verification::Missing));
    }

    #[tokio::test]
    async fn test_listing_degrades_without_engine() {
        let fixture = Fixture::new(SAMPLE);
        let orchestrator = fixture.orchestrator("true", "true", Arc::new(FakeInstalled { models: None }));

        let listing = orchestrator.list_display_models().await.unwrap();

        assert!(listing.installed_error.is_some());
        assert_eq!(listing.models.len(), 2);
        assert!(listing.models[0].active);

        assert!(matches!(
            orchestrator.verify_installed("phi3").await,
            Verification::Unknown(_)
        ));
    }

    #[tokio::test]
    async fn test_listing_merges_installed() {
        let fixture = Fixture::new(SAMPLE);
        let orchestrator = fixture.orchestrator("true", "true", installed(&["phi3:latest", "mistral:latest"]));

        let listing = orchestrator.list_display_models().await.unwrap();

        let names: Vec<&str> = listing.models.iter().map(|m| m.name.as_str()).collect();

        assert!(listing.installed_error.is_none());
        assert_eq!(names, ["phi3:latest", "mistral:latest", "GPT4"]);
        assert!(listing.models[0].active && listing.models[0].configured);
    }

    #[test]
    fn test_default_name() {
        assert_eq!(default_name("phi3"), "phi3");
        assert_eq!(default_name("phi3:mini"), "phi3:mini");
        assert_eq!(
            default_name("hf.co/elyza/Llama-3-ELYZA-JP-8B-GGUF"),
            "Llama-3-ELYZA-JP-8B-GGUF"
        );
    }
}
