//! Lab facade: plan, start, tear down.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use netlab_shared::errors::{NetlabError, NetlabResult};

use crate::controller::{
    CleanupCoordinator, OperatorPrompt, ProcessRegistry, RunOutcome, TeardownReport,
};
use crate::mux::{self, Multiplexer};
use crate::node::{GuestExports, NodeSupervisor};
use crate::rootfs::{RootImageBuilder, RootImageSources};
use crate::runtime::layout::WorkspaceLayout;
use crate::runtime::options::LabOptions;
use crate::runtime::workspace::Workspace;
use crate::switch::SwitchSupervisor;
use crate::topology::{LabFile, LabPlan, plan_lab};
use crate::util;

/// A validated lab, ready to start.
#[derive(Debug, Clone)]
pub struct Lab {
    plan: LabPlan,
    options: LabOptions,
    /// Directory of the lab file, exported to generic guests.
    lab_dir: Option<PathBuf>,
}

/// Host resources resolved before anything is allocated.
struct Preflight {
    emulator: PathBuf,
    switch: PathBuf,
    kernel: Option<PathBuf>,
    image: ImageSource,
}

enum ImageSource {
    Prebuilt(PathBuf),
    Build(RootImageSources),
    NotNeeded,
}

impl Lab {
    /// Load and plan a lab file.
    pub fn load(path: &Path) -> NetlabResult<Self> {
        let file = LabFile::load(path)?;
        let lab_dir = path
            .parent()
            .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
            .and_then(|p| p.canonicalize().ok());
        Self::from_file(file, lab_dir)
    }

    pub fn from_file(file: LabFile, lab_dir: Option<PathBuf>) -> NetlabResult<Self> {
        file.settings.validate()?;
        let plan = plan_lab(&file.nodes, lab_dir.as_deref())?;
        Ok(Self {
            plan,
            options: file.settings,
            lab_dir,
        })
    }

    pub fn plan(&self) -> &LabPlan {
        &self.plan
    }

    pub fn options(&self) -> &LabOptions {
        &self.options
    }

    /// Settings overrides (CLI flags, environment).
    pub fn options_mut(&mut self) -> &mut LabOptions {
        &mut self.options
    }

    /// Allocate the workspace, build the root image, start switches and nodes.
    ///
    /// Host prerequisites are checked first, so a missing binary or kernel
    /// fails before the workspace exists. Any later failure tears down what
    /// was started before returning the error.
    pub fn start(
        &self,
        multiplexer: Arc<dyn Multiplexer>,
        prompt: Box<dyn OperatorPrompt>,
    ) -> NetlabResult<RunningLab> {
        self.options.validate()?;
        let preflight = self.preflight()?;

        let workspace = Workspace::create(self.options.workspace_base.as_deref())?;
        let coordinator = CleanupCoordinator::new(workspace, prompt)
            .with_grace_period(self.options.grace_period())
            .with_multiplexer(multiplexer.clone());
        let layout = coordinator.workspace().layout();

        let switches = SwitchSupervisor::new(
            preflight.switch.clone(),
            layout.clone(),
            self.options.switch_ready_timeout(),
        );

        let mut running = RunningLab {
            plan: self.plan.clone(),
            coordinator,
            switches,
            multiplexer,
            layout,
        };

        if let Err(e) = self.bring_up(&mut running, preflight) {
            running
                .coordinator
                .teardown(&RunOutcome::Failed(e.to_string()));
            return Err(e);
        }

        Ok(running)
    }

    fn preflight(&self) -> NetlabResult<Preflight> {
        let emulator = util::find_binary(&self.options.emulator)?;
        let switch = util::find_binary(&self.options.switch)?;

        if !self.plan.has_generic_nodes() {
            return Ok(Preflight {
                emulator,
                switch,
                kernel: None,
                image: ImageSource::NotNeeded,
            });
        }

        let kernel = self.options.resolved_kernel()?;
        if !kernel.is_file() {
            return Err(NetlabError::NotFound(format!(
                "Guest kernel not found: {}",
                kernel.display()
            )));
        }

        let image = match &self.options.root_image {
            Some(path) if path.is_file() => ImageSource::Prebuilt(path.clone()),
            Some(path) => {
                return Err(NetlabError::NotFound(format!(
                    "Root image not found: {}",
                    path.display()
                )));
            }
            None => ImageSource::Build(RootImageSources::from_options(&self.options)?),
        };

        Ok(Preflight {
            emulator,
            switch,
            kernel: Some(kernel),
            image,
        })
    }

    fn bring_up(&self, running: &mut RunningLab, preflight: Preflight) -> NetlabResult<()> {
        let layout = running.layout.clone();

        let root_image = match preflight.image {
            ImageSource::Prebuilt(path) => path,
            ImageSource::Build(sources) => {
                RootImageBuilder::new(sources)
                    .build(&layout.rootfs_staging(), &layout.root_image())?
                    .path
            }
            ImageSource::NotNeeded => layout.root_image(),
        };

        for segment in &self.plan.segments {
            running
                .switches
                .start_segment(segment, running.coordinator.registry_mut())?;
        }

        let exports = GuestExports {
            home: self.options.resolved_home(),
            lab_dir: self.options.lab_dir.clone().or_else(|| self.lab_dir.clone()),
            workspace: layout.root().to_path_buf(),
            modules_dir: self.options.modules_dir().ok().filter(|p| p.is_dir()),
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        };

        let nodes = NodeSupervisor::new(
            self.options.clone(),
            layout,
            preflight.emulator,
            preflight.kernel,
            root_image,
            exports,
            running.multiplexer.clone(),
        );
        nodes.start_all(
            &self.plan.nodes,
            &running.switches,
            running.coordinator.registry_mut(),
        )
    }
}

/// A started lab. Dropping it tears everything down.
pub struct RunningLab {
    plan: LabPlan,
    coordinator: CleanupCoordinator,
    switches: SwitchSupervisor,
    multiplexer: Arc<dyn Multiplexer>,
    layout: WorkspaceLayout,
}

impl RunningLab {
    pub fn plan(&self) -> &LabPlan {
        &self.plan
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    pub fn workspace_path(&self) -> &Path {
        self.layout.root()
    }

    pub fn registry(&self) -> &ProcessRegistry {
        self.coordinator.registry()
    }

    pub fn switches(&self) -> &SwitchSupervisor {
        &self.switches
    }

    pub fn help_text(&self) -> String {
        mux::help_text(&self.plan, self.multiplexer.as_ref())
    }

    /// Tear the lab down. `RunOutcome::Completed` skips the acknowledgment prompt.
    pub fn teardown(mut self, outcome: RunOutcome) -> TeardownReport {
        if outcome == RunOutcome::Completed {
            self.coordinator.mark_completed();
        }
        self.coordinator.teardown(&outcome)
    }
}
