//! Inventory data model
//!
//! Scopes, normalized resource descriptors and the per-scope results that
//! the aggregator folds up the hierarchy.

use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Fargate-style CPU units that make up one vCPU.
///
/// This is a provider convention, not something reported by the API.
pub const CPU_UNITS_PER_VCPU: u64 = 1024;

/// Kind of node in the billing hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Organization,
    Folder,
    /// Project, subscription or account: the only kind that hosts compute
    Terminal,
}

/// A node in the organizational hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub id: String,
    pub kind: ScopeKind,
    pub name: Option<String>,
}

impl Scope {
    pub fn new(id: impl Into<String>, kind: ScopeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
        }
    }

    pub fn organization(id: impl Into<String>) -> Self {
        Self::new(id, ScopeKind::Organization)
    }

    pub fn folder(id: impl Into<String>) -> Self {
        Self::new(id, ScopeKind::Folder)
    }

    pub fn terminal(id: impl Into<String>) -> Self {
        Self::new(id, ScopeKind::Terminal)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = if name.is_empty() { None } else { Some(name) };
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == ScopeKind::Terminal
    }

    /// Name if known, id otherwise
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Billable unit categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceClass {
    Vm,
    ScaleSetMember,
    ContainerTask,
    /// Reported for information only, never billed
    ServerlessFunction,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 4] = [
        ResourceClass::Vm,
        ResourceClass::ScaleSetMember,
        ResourceClass::ContainerTask,
        ResourceClass::ServerlessFunction,
    ];

    pub fn is_billable(self) -> bool {
        !matches!(self, ResourceClass::ServerlessFunction)
    }

    /// Whether the class counts toward the instance total
    pub fn is_instance(self) -> bool {
        matches!(self, ResourceClass::Vm | ResourceClass::ScaleSetMember)
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceClass::Vm => "VM",
            ResourceClass::ScaleSetMember => "Scale set member",
            ResourceClass::ContainerTask => "Container task",
            ResourceClass::ServerlessFunction => "Serverless function",
        }
    }
}

/// Lifecycle state of a resource; only `Running` counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Running,
    Stopped,
    Terminated,
    Unknown,
}

/// Lookup key for the SKU map
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SkuKey {
    pub type_key: String,
    /// Zone or region, for providers whose machine types are location-scoped
    pub locality: Option<String>,
}

impl SkuKey {
    pub fn new(type_key: impl Into<String>, locality: Option<String>) -> Self {
        Self {
            type_key: type_key.into(),
            locality,
        }
    }

    pub fn global(type_key: impl Into<String>) -> Self {
        Self::new(type_key, None)
    }
}

impl fmt::Display for SkuKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locality {
            Some(locality) => write!(f, "{} ({})", self.type_key, locality),
            None => write!(f, "{}", self.type_key),
        }
    }
}

/// How a descriptor's vCPU count is determined
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capacity {
    /// Resolved through the SKU map
    Sku(SkuKey),
    /// Reported directly in CPU units, see [`CPU_UNITS_PER_VCPU`]
    CpuUnits(u32),
    /// Counted but carries no capacity
    Informational,
}

/// A normalized billable unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub id: String,
    pub scope_id: String,
    pub class: ResourceClass,
    pub capacity: Capacity,
    /// Resolved vCPUs; 0 when resolution failed (see `unresolved`)
    pub vcpus: u32,
    pub unresolved: bool,
    pub region: String,
    pub zone: Option<String>,
    pub state: InstanceState,
}

impl ResourceDescriptor {
    pub fn new(
        id: impl Into<String>,
        scope_id: impl Into<String>,
        class: ResourceClass,
        capacity: Capacity,
        region: impl Into<String>,
        state: InstanceState,
    ) -> Self {
        Self {
            id: id.into(),
            scope_id: scope_id.into(),
            class,
            capacity,
            vcpus: 0,
            unresolved: false,
            region: region.into(),
            zone: None,
            state,
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    pub fn sku_key(&self) -> Option<&SkuKey> {
        match &self.capacity {
            Capacity::Sku(key) => Some(key),
            _ => None,
        }
    }
}

/// Counters for one resource class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassTally {
    pub count: u64,
    pub vcpus: u64,
    pub cpu_units: u64,
}

impl AddAssign for ClassTally {
    fn add_assign(&mut self, rhs: Self) {
        self.count += rhs.count;
        self.vcpus += rhs.vcpus;
        self.cpu_units += rhs.cpu_units;
    }
}

/// Per-scope counts, summed elementwise up the tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub classes: BTreeMap<ResourceClass, ClassTally>,
    pub container_clusters: u64,
    pub unresolved: u64,
}

impl Tally {
    /// Tally a terminal scope's descriptors. Only running descriptors count.
    ///
    /// Container CPU units are summed for the scope and converted once,
    /// rounding up.
    pub fn from_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a ResourceDescriptor>) -> Self {
        let mut tally = Tally::default();
        for descriptor in descriptors.into_iter().filter(|d| d.is_running()) {
            let entry = tally.classes.entry(descriptor.class).or_default();
            entry.count += 1;
            match descriptor.capacity {
                Capacity::CpuUnits(units) => entry.cpu_units += u64::from(units),
                Capacity::Sku(_) => entry.vcpus += u64::from(descriptor.vcpus),
                Capacity::Informational => {}
            }
            if descriptor.unresolved {
                tally.unresolved += 1;
            }
        }
        if let Some(tasks) = tally.classes.get_mut(&ResourceClass::ContainerTask) {
            tasks.vcpus += tasks.cpu_units.div_ceil(CPU_UNITS_PER_VCPU);
        }
        tally
    }

    pub fn class(&self, class: ResourceClass) -> ClassTally {
        self.classes.get(&class).copied().unwrap_or_default()
    }

    /// VMs plus scale set members
    pub fn instances(&self) -> u64 {
        self.classes
            .iter()
            .filter(|(class, _)| class.is_instance())
            .map(|(_, t)| t.count)
            .sum()
    }

    /// vCPUs over all billable classes
    pub fn vcpus(&self) -> u64 {
        self.classes
            .iter()
            .filter(|(class, _)| class.is_billable())
            .map(|(_, t)| t.vcpus)
            .sum()
    }
}

impl AddAssign<&Tally> for Tally {
    fn add_assign(&mut self, rhs: &Tally) {
        for (class, counts) in &rhs.classes {
            *self.classes.entry(*class).or_default() += *counts;
        }
        self.container_clusters += rhs.container_clusters;
        self.unresolved += rhs.unresolved;
    }
}

impl Add<&Tally> for Tally {
    type Output = Tally;

    fn add(mut self, rhs: &Tally) -> Tally {
        self += rhs;
        self
    }
}

impl<'a> Sum<&'a Tally> for Tally {
    fn sum<I: Iterator<Item = &'a Tally>>(iter: I) -> Tally {
        iter.fold(Tally::default(), |acc, t| acc + t)
    }
}

/// Classified reason a collection attempt did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ApiDisabled,
    PermissionDenied,
    Transient,
    Unknown,
    Cancelled,
}

impl FailureKind {
    /// Disabled APIs and denied permissions are normal in large estates
    pub fn is_expected(self) -> bool {
        matches!(self, FailureKind::ApiDisabled | FailureKind::PermissionDenied)
    }

    pub fn label(self) -> &'static str {
        match self {
            FailureKind::ApiDisabled => "API disabled",
            FailureKind::PermissionDenied => "permission denied",
            FailureKind::Transient => "transient error",
            FailureKind::Unknown => "error",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

/// A recorded failure, attributed to the scope where it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub scope_id: String,
    pub kind: FailureKind,
    pub detail: String,
}

impl Diagnostic {
    pub fn new(scope_id: impl Into<String>, kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            scope_id: scope_id.into(),
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.scope_id, self.kind.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeStatus {
    Ok,
    PartiallyFailed(String),
    Failed(String),
}

impl ScopeStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, ScopeStatus::Ok)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ScopeStatus::Failed(_))
    }

    pub fn label(&self) -> String {
        match self {
            ScopeStatus::Ok => "ok".to_string(),
            ScopeStatus::PartiallyFailed(reason) => format!("partial: {}", reason),
            ScopeStatus::Failed(reason) => format!("failed: {}", reason),
        }
    }
}

/// Aggregation output for one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeResult {
    pub scope: Scope,
    pub tally: Tally,
    pub status: ScopeStatus,
    pub diagnostics: Vec<Diagnostic>,
    pub warnings: Vec<String>,
}

impl ScopeResult {
    pub fn empty(scope: Scope) -> Self {
        Self {
            scope,
            tally: Tally::default(),
            status: ScopeStatus::Ok,
            diagnostics: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// The failure kind shared by every diagnostic, if there is exactly one
    pub fn failure_kind(&self) -> Option<FailureKind> {
        let first = self.diagnostics.first()?.kind;
        self.diagnostics
            .iter()
            .all(|d| d.kind == first)
            .then_some(first)
    }
}
