//! Error taxonomy for the per-frame pipeline.
//!
//! Every variant is non-fatal: the frame that produced it is dropped and the
//! pipeline goes back to waiting for the next capture.

use thiserror::Error;

/// Which plane of a [`PlanarFrame`](crate::capture::PlanarFrame) an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneKind {
    Luma,
    ChromaA,
    ChromaB,
}

impl std::fmt::Display for PlaneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Luma => "luma",
            Self::ChromaA => "chroma-a",
            Self::ChromaB => "chroma-b",
        };
        f.write_str(name)
    }
}

/// Malformed or missing plane data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame has zero extent ({width}x{height})")]
    ZeroExtent { width: u32, height: u32 },

    #[error("{plane} plane is missing")]
    MissingPlane { plane: PlaneKind },

    #[error("{plane} plane has a zero stride or subsampling factor")]
    InvalidLayout { plane: PlaneKind },

    #[error("{plane} plane needs {required} bytes, buffer holds {actual}")]
    UndersizedPlane {
        plane: PlaneKind,
        required: usize,
        actual: usize,
    },
}

/// Missing raster or mask, or a mask whose buffer disagrees with its size.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompositeError {
    #[error("source raster is empty ({width}x{height})")]
    EmptyRaster { width: u32, height: u32 },

    #[error("confidence mask is empty ({width}x{height})")]
    EmptyMask { width: u32, height: u32 },

    #[error("confidence mask holds {actual} values, expected {expected}")]
    MaskLength { expected: usize, actual: usize },
}

/// Failures reported by (or while talking to) the mask engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("segmentation failed: {0}")]
    Inference(String),

    #[error("mask engine is busy")]
    Busy,

    #[error("mask engine has shut down")]
    Disconnected,
}

/// Umbrella error for one pass through the pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("composite failed: {0}")]
    Composite(#[from] CompositeError),

    #[error("mask engine: {0}")]
    Engine(#[from] EngineError),

    #[error("display surface not laid out ({width}x{height})")]
    NotReady { width: u32, height: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = DecodeError::UndersizedPlane {
            plane: PlaneKind::ChromaB,
            required: 8,
            actual: 4,
        };
        assert_eq!(err.to_string(), "chroma-b plane needs 8 bytes, buffer holds 4");

        let err: PipelineError = CompositeError::MaskLength {
            expected: 16,
            actual: 15,
        }
        .into();
        assert!(err.to_string().starts_with("composite failed"));
        assert!(err.to_string().contains("15"));

        let err = PipelineError::NotReady {
            width: 0,
            height: 720,
        };
        assert_eq!(err.to_string(), "display surface not laid out (0x720)");
    }
}
