//! Normalized activity fields and the locators that populate them.

pub mod locator;
pub mod mapper;
pub mod timestamp;
pub mod transform;

use std::fmt;
use std::str::FromStr;

use convert_case::{Case, Casing};

pub use locator::{DataType, Locator, LocatorOverrides, LocatorType};
pub use mapper::{FieldMapper, ValueHook};
pub use timestamp::TimeUnits;
pub use transform::{TransformPhase, ValueTransform};

/// The normalized attributes an activity record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    ApplName,
    ServerName,
    ServerIp,
    ServerOs,
    UserName,
    ResourceMgr,
    ResMgrType,
    Resource,
    ResType,
    ActivityName,
    ActivityType,
    StartTime,
    EndTime,
    ElapsedTime,
    StatusCode,
    ReasonCode,
    ErrorMsg,
    Severity,
    Location,
    Correlator,
    TrackingId,
    Signature,
    Transport,
    Tag,
    Value,
    ActivityData,
    ProcessId,
    ThreadId,
}

impl FieldType {
    pub const ALL: [FieldType; 28] = [
        FieldType::ApplName,
        FieldType::ServerName,
        FieldType::ServerIp,
        FieldType::ServerOs,
        FieldType::UserName,
        FieldType::ResourceMgr,
        FieldType::ResMgrType,
        FieldType::Resource,
        FieldType::ResType,
        FieldType::ActivityName,
        FieldType::ActivityType,
        FieldType::StartTime,
        FieldType::EndTime,
        FieldType::ElapsedTime,
        FieldType::StatusCode,
        FieldType::ReasonCode,
        FieldType::ErrorMsg,
        FieldType::Severity,
        FieldType::Location,
        FieldType::Correlator,
        FieldType::TrackingId,
        FieldType::Signature,
        FieldType::Transport,
        FieldType::Tag,
        FieldType::Value,
        FieldType::ActivityData,
        FieldType::ProcessId,
        FieldType::ThreadId,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FieldType::ApplName => "ApplName",
            FieldType::ServerName => "ServerName",
            FieldType::ServerIp => "ServerIp",
            FieldType::ServerOs => "ServerOs",
            FieldType::UserName => "UserName",
            FieldType::ResourceMgr => "ResourceMgr",
            FieldType::ResMgrType => "ResMgrType",
            FieldType::Resource => "Resource",
            FieldType::ResType => "ResType",
            FieldType::ActivityName => "ActivityName",
            FieldType::ActivityType => "ActivityType",
            FieldType::StartTime => "StartTime",
            FieldType::EndTime => "EndTime",
            FieldType::ElapsedTime => "ElapsedTime",
            FieldType::StatusCode => "StatusCode",
            FieldType::ReasonCode => "ReasonCode",
            FieldType::ErrorMsg => "ErrorMsg",
            FieldType::Severity => "Severity",
            FieldType::Location => "Location",
            FieldType::Correlator => "Correlator",
            FieldType::TrackingId => "TrackingId",
            FieldType::Signature => "Signature",
            FieldType::Transport => "Transport",
            FieldType::Tag => "Tag",
            FieldType::Value => "Value",
            FieldType::ActivityData => "ActivityData",
            FieldType::ProcessId => "ProcessId",
            FieldType::ThreadId => "ThreadId",
        }
    }

    /// Fields backed by an enumerated type. These take exactly one locator.
    pub fn is_enumeration(self) -> bool {
        matches!(
            self,
            FieldType::ActivityType
                | FieldType::ResMgrType
                | FieldType::ResType
                | FieldType::StatusCode
                | FieldType::Severity
                | FieldType::Transport
        )
    }
}

impl FromStr for FieldType {
    type Err = String;

    /// Accepts any case convention: `ActivityName`, `activity_name`,
    /// `activity-name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_case(Case::Pascal);
        FieldType::ALL
            .iter()
            .copied()
            .find(|ft| ft.name() == wanted)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A normalized field plus the ordered locators that produce its value.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityField {
    pub field_type: FieldType,
    pub locators: Vec<Locator>,
    /// Joins the outputs of multiple locators.
    pub separator: String,
    pub transformations: Vec<ValueTransform>,
}

impl ActivityField {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            locators: Vec::new(),
            separator: String::new(),
            transformations: Vec::new(),
        }
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locators.push(locator);
        self
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_transformation(mut self, transform: ValueTransform) -> Self {
        self.transformations.push(transform);
        self
    }

    pub fn is_enumeration(&self) -> bool {
        self.field_type.is_enumeration()
    }

    /// Transformations that run in `phase`, in declaration order.
    pub fn transformations_in(&self, phase: TransformPhase) -> impl Iterator<Item = &ValueTransform> {
        self.transformations.iter().filter(move |t| t.phase == phase)
    }
}

impl fmt::Display for ActivityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_from_any_case() {
        assert_eq!("ActivityName".parse::<FieldType>().unwrap(), FieldType::ActivityName);
        assert_eq!("activity_name".parse::<FieldType>().unwrap(), FieldType::ActivityName);
        assert_eq!("elapsed-time".parse::<FieldType>().unwrap(), FieldType::ElapsedTime);
        assert_eq!("res_mgr_type".parse::<FieldType>().unwrap(), FieldType::ResMgrType);
        assert!("NotAField".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_enumeration_fields() {
        assert!(FieldType::Severity.is_enumeration());
        assert!(FieldType::StatusCode.is_enumeration());
        assert!(!FieldType::ActivityName.is_enumeration());
    }
}
