pub mod assets;
pub mod bundle;
pub mod execute;
pub mod id_map;
pub mod progress;
pub mod report;
mod rows;
mod table_order;
pub mod validator;

pub use assets::{AssetRelocator, ImageKind};
pub use bundle::{ExtractedArchive, ImportBundle, ImportBundleError};
pub use execute::{run_import, ImportContext, ImportError, ImportOptions, OrphanPolicy};
pub use id_map::IdMapTable;
pub use progress::{ImportProgress, ProgressPublisher};
pub use report::{
    write_import_report, ImportIssue, ImportResult, Severity, TableImportResult,
};
pub use rows::RowError;
pub use table_order::IMPORT_ORDER;
pub use validator::{validate, ValidationError, ValidationOutcome};

pub const MIN_SUPPORTED_APP_VERSION: &str = "0.1.0";
