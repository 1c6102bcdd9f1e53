use crate::error::{Error, Result};
use crate::memory::SizeTracking;
use crate::policy::PlacementPolicy;
use crate::topology::NodeId;

/// What to do when no primitive can satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OomStrategy {
    /// Log the failed request and abort the process.
    #[default]
    Abort,
    /// Return [`Error::OutOfMemory`] (or `ReallocFailed`) to the caller.
    ReturnError,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub size_tracking: SizeTracking,
    pub oom_strategy: OomStrategy,
    pub placement_policy: PlacementPolicy,

    /// Default node to use instead of the nearest one, when online.
    pub default_node: Option<NodeId>,

    /// Start with the usage ledger already locked.
    pub thread_safe: bool,

    /// `false` skips topology discovery and always uses the standard
    /// allocator.
    pub enable_numa: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size_tracking: SizeTracking::default(),
            oom_strategy: OomStrategy::default(),
            placement_policy: PlacementPolicy::default(),
            default_node: None,
            thread_safe: false,
            enable_numa: true,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_node.is_some() && !self.enable_numa {
            return Err(Error::config("default_node requires enable_numa"));
        }

        if self.placement_policy.is_reserved() {
            tracing::debug!(
                policy = %self.placement_policy,
                "placement policy is reserved and behaves like default"
            );
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn size_tracking(mut self, tracking: SizeTracking) -> Self {
        self.config.size_tracking = tracking;
        self
    }

    pub fn oom_strategy(mut self, strategy: OomStrategy) -> Self {
        self.config.oom_strategy = strategy;
        self
    }

    pub fn placement_policy(mut self, policy: PlacementPolicy) -> Self {
        self.config.placement_policy = policy;
        self
    }

    pub fn default_node(mut self, node: NodeId) -> Self {
        self.config.default_node = Some(node);
        self
    }

    pub fn thread_safe(mut self, enable: bool) -> Self {
        self.config.thread_safe = enable;
        self
    }

    pub fn enable_numa(mut self, enable: bool) -> Self {
        self.config.enable_numa = enable;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
