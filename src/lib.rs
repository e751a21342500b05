//! Rescale 3D scans stored as OBJ or PLY from one unit of length to another.
//!
//! ```no_run
//! use scan_scaler::{find_scans, scale_scans, Conversion};
//!
//! let conversion = Conversion::new("m", "mm")?;
//! let scans = find_scans("scans", false)?;
//! for report in scale_scans(&scans, &conversion) {
//!     match report.outcome {
//!         Ok(output) => println!("Scaled: {}", output.display()),
//!         Err(error) => eprintln!("Failed: {}: {}", report.source.display(), error),
//!     }
//! }
//! # Ok::<(), scan_scaler::ScaleError>(())
//! ```

pub mod error;
pub mod nalgebra_types;
pub mod scan;
pub mod units;

pub use error::{ScaleError, ScaleResult};
pub use scan::{
    find_scans, output_path, scale_obj, scale_obj_file, scale_ply, scale_ply_file, scale_scan,
    scale_scans, ScanFile, ScanFormat, ScanReport,
};
pub use units::{conversion_factor, resolve_unit, scale_factor, Conversion, LengthUnit};
