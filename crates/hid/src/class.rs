//! Class container: the dispatch seam between device stack and instance
//!
//! The device stack drives the class through [`HidClass::entry`]. The
//! container owns at most one instance; after a failed `Initialize` it keeps
//! the partially built instance so that the following `Uninitialize` can
//! reclaim exactly what was allocated.

use crate::config::HidParameters;
use crate::instance::HidInstance;
use crate::receive::ReceiverFactory;
use crate::transport::Transport;
use common::{Error, MemoryPool, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Requests from the device stack
pub enum ClassCommand {
    Initialize {
        parameters: HidParameters,
        receiver: Option<ReceiverFactory>,
    },
    /// The host selected a configuration containing the interface
    Activate,
    /// The host dropped that configuration
    Deactivate,
    Uninitialize,
}

impl ClassCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ClassCommand::Initialize { .. } => "initialize",
            ClassCommand::Activate => "activate",
            ClassCommand::Deactivate => "deactivate",
            ClassCommand::Uninitialize => "uninitialize",
        }
    }
}

pub struct HidClass {
    pool: MemoryPool,
    transport: Arc<dyn Transport>,
    instance: Option<HidInstance>,
}

impl HidClass {
    pub fn new(pool: MemoryPool, transport: Arc<dyn Transport>) -> Self {
        Self {
            pool,
            transport,
            instance: None,
        }
    }

    /// Dispatch one command from the device stack
    pub fn entry(&mut self, command: ClassCommand) -> Result<()> {
        debug!("HID class command: {}", command.name());
        match command {
            ClassCommand::Initialize {
                parameters,
                receiver,
            } => self.initialize(parameters, receiver),
            ClassCommand::Activate => self.activate(),
            ClassCommand::Deactivate => self.deactivate(),
            ClassCommand::Uninitialize => self.uninitialize(),
        }
    }

    pub fn initialize(
        &mut self,
        parameters: HidParameters,
        receiver: Option<ReceiverFactory>,
    ) -> Result<()> {
        if self.instance.is_some() {
            return Err(Error::WrongMode("instance already present; uninitialize first"));
        }

        match HidInstance::initialize(
            &self.pool,
            Arc::clone(&self.transport),
            parameters,
            receiver,
        ) {
            Ok(instance) => {
                self.instance = Some(instance);
                Ok(())
            }
            Err(failure) => {
                if failure.partial.is_some() {
                    warn!("Keeping partially initialized HID instance for teardown");
                }
                self.instance = failure.partial;
                Err(failure.error)
            }
        }
    }

    pub fn activate(&mut self) -> Result<()> {
        self.instance
            .as_ref()
            .ok_or(Error::WrongMode("no HID instance"))?
            .activate()
    }

    pub fn deactivate(&mut self) -> Result<()> {
        match &self.instance {
            Some(instance) => instance.deactivate(),
            None => Ok(()),
        }
    }

    /// Tear down the instance, if any
    ///
    /// The transport must have stopped delivering OUT completions to the
    /// instance before this is called.
    pub fn uninitialize(&mut self) -> Result<()> {
        match self.instance.take() {
            Some(instance) => instance.uninitialize(),
            None => {
                debug!("No HID instance to uninitialize");
                Ok(())
            }
        }
    }

    /// The instance, once fully initialized
    pub fn instance(&self) -> Option<&HidInstance> {
        self.instance.as_ref().filter(|i| i.is_ready())
    }

    pub fn instance_mut(&mut self) -> Option<&mut HidInstance> {
        self.instance.as_mut().filter(|i| i.is_ready())
    }

    /// Whether any instance, even a partial one, is held
    pub fn is_present(&self) -> bool {
        self.instance.is_some()
    }

    pub fn pool(&self) -> &MemoryPool {
        &self.pool
    }
}
