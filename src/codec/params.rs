//! Named parameter sets accepted by the engine primitives.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A name that is not part of a parameter enumeration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("'{name}' not recognised, must be one of {expected}")]
pub struct UnknownName {
    pub name: String,
    pub expected: &'static str,
}

macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        $ty:ident, default = $default:ident, { $($variant:ident => $name:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $ty {
            $($variant),+
        }

        impl $ty {
            /// Every accepted name, `|`-separated, for diagnostics.
            pub const NAMES: &'static str = concat!($($name, "|"),+);

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                $ty::$default
            }
        }

        impl FromStr for $ty {
            type Err = UnknownName;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(UnknownName {
                        name: s.to_string(),
                        expected: Self::NAMES.trim_end_matches('|'),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

named_enum! {
    /// Colorspace an image is rendered into.
    ///
    /// Every name here is accepted by the `colorspace` option. [`RasterCodec`]
    /// only converts into `gray`, `rgb`, `srgb` and `transparent`; the other
    /// models fail at apply time with a transform failure.
    ///
    /// [`RasterCodec`]: super::RasterCodec
    Colorspace, default = Srgb, {
        Cmyk => "cmyk",
        Gray => "gray",
        Hsl => "hsl",
        Hwb => "hwb",
        Ohta => "ohta",
        Rgb => "rgb",
        Srgb => "srgb",
        Transparent => "transparent",
        Xyz => "xyz",
        YCbCr => "ycbcr",
        Ycc => "ycc",
        Yiq => "yiq",
        YPbPr => "ypbpr",
        Yuv => "yuv",
    }
}

named_enum! {
    /// Interlacing scheme of the encoded output.
    Interlace, default = Plane, {
        None => "none",
        Line => "line",
        Plane => "plane",
        Partition => "partition",
    }
}

named_enum! {
    /// Resampling filter used by resize.
    FilterType, default = Cubic, {
        Bessel => "bessel",
        Blackman => "blackman",
        Box => "box",
        Catrom => "catrom",
        Cubic => "cubic",
        Gaussian => "gaussian",
        Hamming => "hamming",
        Hanning => "hanning",
        Hermite => "hermite",
        Lanczos => "lanczos",
        Mitchell => "mitchell",
        Point => "point",
        Quadratic => "quadratic",
        Sinc => "sinc",
        Triangle => "triangle",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_names() {
        assert_eq!("ycbcr".parse::<Colorspace>(), Ok(Colorspace::YCbCr));
        assert_eq!("partition".parse::<Interlace>(), Ok(Interlace::Partition));
        assert_eq!("lanczos".parse::<FilterType>(), Ok(FilterType::Lanczos));
    }

    #[test]
    fn rejects_unknown_name_with_expected_list() {
        let err = "purple".parse::<Colorspace>().unwrap_err();
        assert_eq!(err.name, "purple");
        assert!(err.expected.starts_with("cmyk|gray"));
        assert!(err.expected.ends_with("yuv"));
    }

    #[test]
    fn defaults_match_engine_defaults() {
        assert_eq!(Colorspace::default(), Colorspace::Srgb);
        assert_eq!(Interlace::default(), Interlace::Plane);
        assert_eq!(FilterType::default(), FilterType::Cubic);
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!("CUBIC".parse::<FilterType>().is_err());
    }
}
