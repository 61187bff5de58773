//! Field mapper: owns a parser's field definitions and resolves each field
//! through its locators into an activity record.

use std::borrow::Cow;

use tracing::trace;

use crate::activity::{setters, ActivityInfo};
use crate::error::{ConfigError, FieldError, ParseError};
use crate::extraction::{Extracted, Extractor};
use crate::fields::{ActivityField, Locator, LocatorType, TransformPhase};
use crate::runtime::StreamContext;
use crate::value::{FieldValue, ResolvedValue};

/// Parser-specific adjustment of a field's resolved value, applied before
/// the value reaches the activity record.
pub trait ValueHook: Send + Sync {
    fn adjust(&self, field: &ActivityField, value: ResolvedValue) -> Result<ResolvedValue, FieldError>;
}

/// One locator's output together with the locator as it applied to that
/// read.
#[derive(Debug, Clone)]
pub struct Located<'a> {
    pub locator: Cow<'a, Locator>,
    pub value: FieldValue,
}

/// Result of resolving one field against a raw item.
#[derive(Debug)]
pub enum Resolution<'a> {
    Values(Vec<Located<'a>>),
    /// A required locator found nothing and the caller asked for all
    /// required values to be present.
    MissingRequired(&'a Locator),
}

#[derive(Default)]
pub struct FieldMapper {
    fields: Vec<ActivityField>,
    hook: Option<Box<dyn ValueHook>>,
}

impl FieldMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hook(&mut self, hook: Box<dyn ValueHook>) {
        self.hook = Some(hook);
    }

    /// Register a field. Enumeration fields may not be composed from
    /// several locators.
    pub fn add_field(&mut self, field: ActivityField) -> Result<(), ConfigError> {
        if field.is_enumeration() && field.locators.len() > 1 {
            return Err(ConfigError::EnumerationMultiLocator {
                field: field.to_string(),
            });
        }

        if field.locators.is_empty() {
            return Err(ConfigError::InvalidLocator {
                field: field.to_string(),
                locator: String::new(),
                reason: "no locators defined".to_string(),
            });
        }

        for locator in &field.locators {
            let invalid = |reason: &str| ConfigError::InvalidLocator {
                field: field.to_string(),
                locator: locator.to_string(),
                reason: reason.to_string(),
            };
            match locator.locator_type {
                LocatorType::Index | LocatorType::MatchNum if locator.position().is_none() => {
                    return Err(invalid("location must be a non-negative number"));
                }
                _ if locator.location.trim().is_empty() => {
                    return Err(invalid("location is empty"));
                }
                _ => {}
            }
        }

        self.fields.push(field);
        Ok(())
    }

    pub fn fields(&self) -> &[ActivityField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Resolve every locator of `field`. Missing values come back as
    /// `Null` unless `require_all` is set and the locator is required.
    /// Raw-phase transformations run on each found value before it is
    /// formatted; `ai` supplies their record variables.
    pub fn resolve<'f>(
        &self,
        ai: &ActivityInfo,
        field: &'f ActivityField,
        ctx: &StreamContext,
        source: &dyn Extractor,
        require_all: bool,
    ) -> Result<Resolution<'f>, FieldError> {
        let mut located = Vec::with_capacity(field.locators.len());
        for locator in &field.locators {
            let found = if locator.locator_type.is_property() {
                property_value(locator, ctx).map(Extracted::new)
            } else {
                source.extract(locator)?
            };

            match found {
                Some(extracted) => {
                    let effective = locator.with_overrides(&extracted.overrides)?;
                    let mut raw = extracted.value;
                    for transform in field.transformations_in(TransformPhase::Raw) {
                        raw = transform.transform(&raw, ai)?;
                    }
                    let value = effective.format_value(raw)?;
                    located.push(Located {
                        locator: effective,
                        value,
                    });
                }
                None if require_all && locator.required => {
                    return Ok(Resolution::MissingRequired(locator));
                }
                None => located.push(Located {
                    locator: Cow::Borrowed(locator),
                    value: FieldValue::Null,
                }),
            }
        }
        Ok(Resolution::Values(located))
    }

    /// Apply located values of `field` to the record, running the value
    /// hook first.
    pub fn apply_located(
        &self,
        ai: &mut ActivityInfo,
        field: &ActivityField,
        located: Vec<Located<'_>>,
    ) -> Result<(), FieldError> {
        let mut locators: Vec<Cow<'_, Locator>> = Vec::with_capacity(located.len());
        let mut values = Vec::with_capacity(located.len());
        for l in located {
            locators.push(l.locator);
            values.push(l.value);
        }

        let resolved = if values.len() == 1 {
            ResolvedValue::Scalar(values.remove(0))
        } else {
            ResolvedValue::Composite(values)
        };
        self.apply_value(ai, field, resolved, &locators)
    }

    /// Apply an already resolved value. `locators` are the effective
    /// locators the value came from; empty for synthetic fields.
    ///
    /// Formatted-phase transformations run first, then the value hook.
    pub fn apply_value(
        &self,
        ai: &mut ActivityInfo,
        field: &ActivityField,
        value: ResolvedValue,
        locators: &[Cow<'_, Locator>],
    ) -> Result<(), FieldError> {
        let value = transform_value(ai, field, value)?;
        let value = match &self.hook {
            Some(hook) => hook.adjust(field, value)?,
            None => value,
        };
        let refs: Vec<&Locator> = locators.iter().map(|l| l.as_ref()).collect();
        ai.apply_field(field, value, &refs)
    }

    /// Resolve and apply every field in order.
    ///
    /// # Returns
    /// `Ok(false)` when a required value was missing under `require_all`;
    /// the record must then be discarded
    pub fn map_fields(
        &self,
        ai: &mut ActivityInfo,
        ctx: &StreamContext,
        source: &dyn Extractor,
        require_all: bool,
    ) -> Result<bool, ParseError> {
        for field in &self.fields {
            let resolution = self
                .resolve(ai, field, ctx, source, require_all)
                .map_err(|e| ParseError::field(field.to_string(), e))?;

            match resolution {
                Resolution::Values(located) => {
                    trace!("Resolved field {} from {} locator(s)", field, located.len());
                    self.apply_located(ai, field, located)
                        .map_err(|e| ParseError::field(field.to_string(), e))?;
                }
                Resolution::MissingRequired(locator) => {
                    trace!(
                        "Required locator {} of field {} not found, skipping activity",
                        locator,
                        field
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// Run the formatted-phase transformations of `field`. Composite values
/// are joined with the field separator first, so the expression sees the
/// same text the record would.
fn transform_value(
    ai: &ActivityInfo,
    field: &ActivityField,
    value: ResolvedValue,
) -> Result<ResolvedValue, FieldError> {
    let mut transforms = field.transformations_in(TransformPhase::Formatted).peekable();
    if transforms.peek().is_none() {
        return Ok(value);
    }

    let mut current = match value.normalize() {
        ResolvedValue::Scalar(v) => v,
        ResolvedValue::Composite(values) => FieldValue::String(
            values
                .iter()
                .filter(|v| !v.is_null())
                .map(setters::text_value)
                .collect::<Vec<_>>()
                .join(&field.separator),
        ),
    };
    for transform in transforms {
        current = transform.transform(&current, ai)?;
    }
    Ok(ResolvedValue::Scalar(current))
}

/// Value of an `EnvProperty`/`StreamProperty` locator. Environment
/// properties fall back to the process environment.
fn property_value(locator: &Locator, ctx: &StreamContext) -> Option<String> {
    let name = locator.location.trim();
    match ctx.property(name) {
        Some(v) => Some(v.to_string()),
        None if locator.locator_type == LocatorType::EnvProperty => std::env::var(name).ok(),
        None => None,
    }
}
