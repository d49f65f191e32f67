pub mod builder;
pub mod classify;
pub mod dialect;
pub mod oracle;
pub mod postgres;

pub use builder::{
    build_delete, build_insert, build_reselect, build_select, build_update, Connective, Filter,
    FilterOp, Filters, OrderBy, PrimaryKeyValue, SelectRequest,
};
pub use classify::{classify, parse_script, split_statements, Statement, StatementKind};
pub use dialect::{Dialect, Engine, SupportedFeatures};
