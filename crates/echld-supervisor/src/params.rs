//! Named parameters exposed through `GetParam`/`SetParam`.
//!
//! A [`ParamSet`] is a static table of accessors over some context type
//! (the worker's or the dispatcher's). Which accessors are present decides
//! whether a parameter is read-only, write-only or read-write.

use std::fmt;

use echld_payload::{ErrorCode, Params};

use crate::state::WorkerState;

/// Name of the built-in parameter listing every other parameter.
pub const PARAMS_LISTING: &str = "params";

/// Why a parameter operation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("unknown parameter '{0}'")]
    Unknown(String),

    #[error("parameter '{0}' is read-only")]
    ReadOnly(String),

    #[error("parameter '{0}' is write-only")]
    WriteOnly(String),

    #[error("invalid value for '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("parameter '{name}' cannot be changed while {state}")]
    WrongState { name: String, state: WorkerState },
}

impl ParamError {
    /// Wire error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            ParamError::Unknown(_) => ErrorCode::UnknownParam,
            ParamError::ReadOnly(_) => ErrorCode::ReadOnlyParam,
            ParamError::WriteOnly(_) => ErrorCode::WriteOnlyParam,
            ParamError::Invalid { .. } => ErrorCode::InvalidParam,
            ParamError::WrongState { .. } => ErrorCode::WrongMessage,
        }
    }

    /// Shorthand for [`ParamError::Invalid`].
    pub fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ParamError::Invalid {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Value of a parameter, or why it could not be read or written.
pub type ParamResult = Result<String, ParamError>;

pub type Getter<C> = fn(&C) -> ParamResult;
pub type Setter<C> = fn(&mut C, &str) -> ParamResult;

/// Access mode of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Access {
    pub fn as_str(self) -> &'static str {
        match self {
            Access::ReadOnly => "ro",
            Access::WriteOnly => "wo",
            Access::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parameter: a name, optional accessors and a description.
pub struct Param<C> {
    pub name: &'static str,
    pub description: &'static str,
    get: Option<Getter<C>>,
    set: Option<Setter<C>>,
}

impl<C> Param<C> {
    pub const fn read_only(name: &'static str, description: &'static str, get: Getter<C>) -> Self {
        Self {
            name,
            description,
            get: Some(get),
            set: None,
        }
    }

    pub const fn write_only(name: &'static str, description: &'static str, set: Setter<C>) -> Self {
        Self {
            name,
            description,
            get: None,
            set: Some(set),
        }
    }

    pub const fn read_write(
        name: &'static str,
        description: &'static str,
        get: Getter<C>,
        set: Setter<C>,
    ) -> Self {
        Self {
            name,
            description,
            get: Some(get),
            set: Some(set),
        }
    }

    pub fn access(&self) -> Access {
        match (self.get.is_some(), self.set.is_some()) {
            (true, true) => Access::ReadWrite,
            (false, true) => Access::WriteOnly,
            _ => Access::ReadOnly,
        }
    }
}

/// Static registry of parameters over a context type.
pub struct ParamSet<C: 'static> {
    params: &'static [Param<C>],
}

impl<C: 'static> ParamSet<C> {
    pub const fn new(params: &'static [Param<C>]) -> Self {
        Self { params }
    }

    pub fn find(&self, name: &str) -> Option<&Param<C>> {
        self.params.iter().find(|param| param.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param<C>> {
        self.params.iter()
    }

    /// Read a parameter. `params` lists the whole table.
    pub fn get(&self, ctx: &C, name: &str) -> Result<String, ParamError> {
        if name == PARAMS_LISTING {
            return Ok(self.listing());
        }
        let param = self
            .find(name)
            .ok_or_else(|| ParamError::Unknown(name.to_string()))?;
        let get = param
            .get
            .ok_or_else(|| ParamError::WriteOnly(name.to_string()))?;
        get(ctx)
    }

    /// Assign a parameter and return its new value.
    pub fn set(&self, ctx: &mut C, name: &str, value: &str) -> Result<String, ParamError> {
        if name == PARAMS_LISTING {
            return Err(ParamError::ReadOnly(name.to_string()));
        }
        let param = self
            .find(name)
            .ok_or_else(|| ParamError::Unknown(name.to_string()))?;
        let set = param
            .set
            .ok_or_else(|| ParamError::ReadOnly(name.to_string()))?;
        set(ctx, value)
    }

    /// Assign every pair in order, collecting the failures.
    pub fn apply(&self, ctx: &mut C, params: &Params) -> Vec<ParamError> {
        params
            .iter()
            .filter_map(|(name, value)| self.set(ctx, name, value).err())
            .collect()
    }

    /// One line per parameter: `name (mode): description`.
    pub fn listing(&self) -> String {
        let mut lines: Vec<String> = self
            .params
            .iter()
            .map(|param| format!("{} ({}): {}", param.name, param.access(), param.description))
            .collect();
        lines.push(format!(
            "{PARAMS_LISTING} ({}): this list",
            Access::ReadOnly
        ));
        lines.join("\n")
    }
}

/// Parse the `TRUE`/`FALSE` spelling used by boolean parameters.
pub fn parse_flag(name: &str, value: &str) -> Result<bool, ParamError> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        other => Err(ParamError::invalid(
            name,
            format!("expected TRUE or FALSE, got '{other}'"),
        )),
    }
}

pub fn format_flag(value: bool) -> String {
    if value { "TRUE" } else { "FALSE" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Knobs {
        level: u32,
        secret: String,
    }

    fn get_level(k: &Knobs) -> Result<String, ParamError> {
        Ok(k.level.to_string())
    }

    fn set_level(k: &mut Knobs, value: &str) -> Result<String, ParamError> {
        k.level = value
            .parse()
            .map_err(|_| ParamError::invalid("level", "not a number"))?;
        Ok(k.level.to_string())
    }

    fn get_version(_: &Knobs) -> Result<String, ParamError> {
        Ok("1.0".into())
    }

    fn set_secret(k: &mut Knobs, value: &str) -> Result<String, ParamError> {
        k.secret = value.to_string();
        Ok(String::new())
    }

    const KNOB_TABLE: &[Param<Knobs>] = &[
        Param::read_write("level", "verbosity", get_level, set_level),
        Param::read_only("version", "version string", get_version),
        Param::write_only("secret", "token", set_secret),
    ];

    static KNOBS: ParamSet<Knobs> = ParamSet::new(KNOB_TABLE);

    #[test]
    fn access_follows_accessors() {
        let modes: Vec<_> = KNOBS.iter().map(|p| p.access()).collect();
        assert_eq!(
            modes,
            vec![Access::ReadWrite, Access::ReadOnly, Access::WriteOnly]
        );
    }

    #[test]
    fn get_and_set() {
        let mut knobs = Knobs::default();
        assert_eq!(KNOBS.set(&mut knobs, "level", "3").unwrap(), "3");
        assert_eq!(KNOBS.get(&knobs, "level").unwrap(), "3");
        KNOBS.set(&mut knobs, "secret", "s3cr3t").unwrap();
        assert_eq!(knobs.secret, "s3cr3t");
    }

    #[test]
    fn access_violations() {
        let mut knobs = Knobs::default();
        assert_eq!(
            KNOBS.set(&mut knobs, "version", "2").unwrap_err(),
            ParamError::ReadOnly("version".into())
        );
        assert_eq!(
            KNOBS.get(&knobs, "secret").unwrap_err(),
            ParamError::WriteOnly("secret".into())
        );
        assert_eq!(
            KNOBS.get(&knobs, "missing").unwrap_err().code(),
            ErrorCode::UnknownParam
        );
        assert_eq!(
            KNOBS.set(&mut knobs, "params", "x").unwrap_err(),
            ParamError::ReadOnly("params".into())
        );
    }

    #[test]
    fn apply_collects_failures_and_keeps_going() {
        let mut knobs = Knobs::default();
        let params = Params::new()
            .with("level", "nine")
            .with("bogus", "1")
            .with("level", "9");
        let failures = KNOBS.apply(&mut knobs, &params);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].code(), ErrorCode::InvalidParam);
        assert_eq!(failures[1], ParamError::Unknown("bogus".into()));
        assert_eq!(knobs.level, 9);
    }

    #[test]
    fn listing_names_every_parameter() {
        let listing = KNOBS.get(&Knobs::default(), "params").unwrap();
        assert!(listing.contains("level (rw): verbosity"));
        assert!(listing.contains("secret (wo): token"));
        assert!(listing.ends_with("params (ro): this list"));
    }

    #[test]
    fn flags() {
        assert!(parse_flag("quiet", "TRUE").unwrap());
        assert!(!parse_flag("quiet", "FALSE").unwrap());
        assert_eq!(
            parse_flag("quiet", "yes").unwrap_err().code(),
            ErrorCode::InvalidParam
        );
        assert_eq!(format_flag(true), "TRUE");
    }
}
