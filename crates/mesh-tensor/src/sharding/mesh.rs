use alloc::string::{String, ToString};
use core::fmt;
use core::str::FromStr;

use serde_json::Value;

/// A named axis of the two-dimensional device mesh.
///
/// The mesh always has exactly two axes, `"x"` and `"y"`. Every operation that walks the
/// axes does so in [`MeshAxis::ALL`] order.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum MeshAxis {
    /// The `"x"` axis.
    X,
    /// The `"y"` axis.
    Y,
}

impl MeshAxis {
    /// Both mesh axes, x first.
    pub const ALL: [MeshAxis; 2] = [MeshAxis::X, MeshAxis::Y];

    /// The name used for this axis in configuration values and metadata.
    pub fn name(&self) -> &'static str {
        match self {
            MeshAxis::X => "x",
            MeshAxis::Y => "y",
        }
    }
}

impl fmt::Display for MeshAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MeshAxis {
    type Err = MeshConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "x" => Ok(MeshAxis::X),
            "y" => Ok(MeshAxis::Y),
            other => Err(MeshConfigError::UnknownAxis(other.to_string())),
        }
    }
}

/// Represents errors that can occur when constructing or querying a [`MeshDescriptor`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MeshConfigError {
    /// The configuration value is not a mapping.
    #[error("mesh configuration must be a mapping with 'x' and 'y' keys, got {0}")]
    NotAMapping(String),
    /// A required axis is absent from the configuration.
    #[error("mesh configuration is missing axis '{0}'")]
    MissingAxis(MeshAxis),
    /// An axis device count is not a positive integer.
    #[error("mesh axis '{axis}' must have a positive integer device count, got {value}")]
    InvalidDeviceCount {
        /// The offending axis.
        axis: MeshAxis,
        /// The rejected value, rendered as text.
        value: String,
    },
    /// The total device count does not fit in `usize`.
    #[error("mesh of {x} x {y} devices overflows the device count")]
    TooManyDevices {
        /// Devices along the `"x"` axis.
        x: usize,
        /// Devices along the `"y"` axis.
        y: usize,
    },
    /// An axis name other than `"x"` or `"y"`.
    #[error("unknown mesh axis '{0}', expected 'x' or 'y'")]
    UnknownAxis(String),
    /// The configuration text is not valid JSON.
    #[error("malformed mesh configuration: {0}")]
    Malformed(String),
}

/// Represents the logical two-dimensional grid of devices a tensor is distributed over.
///
/// A `MeshDescriptor` only records how many devices sit along each of the `"x"` and `"y"`
/// axes. It is built once per compilation context and never changes afterwards; tile shapes
/// are derived by ceil-dividing the sharded tensor dimensions by these counts.
///
/// For example, a mesh `{x: 2, y: 4}` holds 8 devices, and a `(128, 256)` tensor sharded
/// with `{x: 0, y: 1}` occupies a `(64, 64)` tile on each of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshDescriptor {
    /// Devices along the `"x"` axis.
    x: usize,
    /// Devices along the `"y"` axis.
    y: usize,
}

impl MeshDescriptor {
    /// Creates a new [`MeshDescriptor`] with the given device counts.
    ///
    /// # Returns
    /// The descriptor, or a [`MeshConfigError::InvalidDeviceCount`] if either count is zero,
    /// or a [`MeshConfigError::TooManyDevices`] if `x * y` overflows.
    pub fn new(x: usize, y: usize) -> Result<Self, MeshConfigError> {
        for (axis, count) in [(MeshAxis::X, x), (MeshAxis::Y, y)] {
            if count == 0 {
                return Err(MeshConfigError::InvalidDeviceCount {
                    axis,
                    value: count.to_string(),
                });
            }
        }
        if x.checked_mul(y).is_none() {
            return Err(MeshConfigError::TooManyDevices { x, y });
        }

        log::debug!("Mesh descriptor created with shape x={x}, y={y}");
        Ok(Self { x, y })
    }

    /// Builds a [`MeshDescriptor`] from a configuration value.
    ///
    /// The value must be a mapping containing the keys `"x"` and `"y"`, each holding a
    /// positive integer. Any other key is ignored.
    ///
    /// # Example
    ///
    /// ```rust
    /// use mesh_tensor::sharding::MeshDescriptor;
    ///
    /// let mesh = MeshDescriptor::from_config(&serde_json::json!({"x": 2, "y": 4})).unwrap();
    /// assert_eq!(mesh.device_count(), 8);
    /// ```
    pub fn from_config(config: &Value) -> Result<Self, MeshConfigError> {
        let map = config
            .as_object()
            .ok_or_else(|| MeshConfigError::NotAMapping(config.to_string()))?;

        for key in map.keys().filter(|key| key.parse::<MeshAxis>().is_err()) {
            log::debug!("Ignoring mesh configuration key '{key}'");
        }

        let count = |axis: MeshAxis| -> Result<usize, MeshConfigError> {
            let value = map
                .get(axis.name())
                .ok_or(MeshConfigError::MissingAxis(axis))?;
            value
                .as_u64()
                .and_then(|count| usize::try_from(count).ok())
                .filter(|&count| count > 0)
                .ok_or_else(|| MeshConfigError::InvalidDeviceCount {
                    axis,
                    value: value.to_string(),
                })
        };

        Self::new(count(MeshAxis::X)?, count(MeshAxis::Y)?)
    }

    /// Builds a [`MeshDescriptor`] from JSON configuration text.
    pub fn from_json_str(text: &str) -> Result<Self, MeshConfigError> {
        let config: Value =
            serde_json::from_str(text).map_err(|err| MeshConfigError::Malformed(err.to_string()))?;
        Self::from_config(&config)
    }

    /// Returns the number of devices along the axis with the given name.
    pub fn axis_device_count(&self, name: &str) -> Result<usize, MeshConfigError> {
        Ok(self.device_count_of(name.parse()?))
    }

    /// Returns the number of devices along `axis`.
    pub fn device_count_of(&self, axis: MeshAxis) -> usize {
        match axis {
            MeshAxis::X => self.x,
            MeshAxis::Y => self.y,
        }
    }

    /// Total number of devices in the mesh, which fits in `usize` by construction.
    pub fn device_count(&self) -> usize {
        self.x * self.y
    }
}
