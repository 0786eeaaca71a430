use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TerseError};

/// Default number of elements per encoded block.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Encoding strategy requested for a frame.
///
/// The on-wire tags keep the declaration order: Unsigned=0, SmallUnsigned=1,
/// Signed=2, Default=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Mode {
    Unsigned,
    SmallUnsigned,
    Signed,
    #[default]
    Default,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Signed, Mode::Unsigned, Mode::SmallUnsigned, Mode::Default];

    pub fn tag(self) -> u8 {
        match self {
            Mode::Unsigned => 0,
            Mode::SmallUnsigned => 1,
            Mode::Signed => 2,
            Mode::Default => 3,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(Mode::Unsigned),
            1 => Some(Mode::SmallUnsigned),
            2 => Some(Mode::Signed),
            3 => Some(Mode::Default),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Unsigned => "unsigned",
            Mode::SmallUnsigned => "small-unsigned",
            Mode::Signed => "signed",
            Mode::Default => "default",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = TerseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unsigned" | "u" => Ok(Mode::Unsigned),
            "small-unsigned" | "small_unsigned" | "small" => Ok(Mode::SmallUnsigned),
            "signed" | "s" => Ok(Mode::Signed),
            "default" | "d" => Ok(Mode::Default),
            other => Err(TerseError::InvalidSetting(format!(
                "unknown mode '{}'. Valid options: signed, unsigned, small-unsigned, default",
                other
            ))),
        }
    }
}

/// Codec settings, passed by value into every encode and decode.
///
/// Changing a container's settings affects only frames encoded afterwards;
/// already-encoded frames keep the layout they were written with until they
/// are explicitly re-encoded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    /// Elements per logical block (the last block of a frame may be shorter).
    pub block_size: usize,
    /// Single min/max pass with the unsigned offset scheme for `Mode::Default`.
    /// Takes precedence over `small`.
    pub fast: bool,
    /// Try splitting each block at its midpoint and keep the split when it is
    /// strictly smaller.
    pub small: bool,
    /// Fraction of the available hardware threads used for block fan-out, in `[0, 1]`.
    pub degree_of_parallelism: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            fast: false,
            small: false,
            degree_of_parallelism: 1.0,
        }
    }
}

impl Settings {
    /// Checks the settings and clamps the degree of parallelism into `[0, 1]`.
    pub fn validate(mut self) -> Result<Self> {
        if self.block_size == 0 {
            return Err(TerseError::InvalidSetting(
                "block_size must be a positive number of elements".to_string(),
            ));
        }
        if !self.degree_of_parallelism.is_finite() {
            return Err(TerseError::InvalidSetting(format!(
                "degree_of_parallelism must be a finite fraction, got {}",
                self.degree_of_parallelism
            )));
        }
        self.degree_of_parallelism = self.degree_of_parallelism.clamp(0.0, 1.0);
        Ok(self)
    }

    /// Whether the midpoint split refinement runs. `fast` wins over `small`.
    pub fn refines_splits(&self) -> bool {
        self.small && !self.fast
    }

    /// Worker count for block fan-out: `round(dop * hardware threads)`, at least 1.
    pub fn workers(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let wanted = (self.degree_of_parallelism.clamp(0.0, 1.0) * available as f64).round() as usize;
        wanted.clamp(1, available)
    }
}
