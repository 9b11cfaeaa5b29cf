/// Registry token meaning "not applicable". Its presence or absence carries no meaning,
/// so it is treated as a missing value before records are compared.
pub const NOT_APPLICABLE: &str = "N/A";

/// Column names, in snapshot order, pulled from the registry for every protocol.
pub const STANDARD_COLS: [&str; 10] = [
    TXTPID, DRAWDM, DRAWDD, DRAWDY, VIDVAL, LSTUDY, GUSPEC, PRIMSTR, ADDSTR, DERVSTR,
];

pub const TXTPID: &str = "txtpid";
pub const DRAWDM: &str = "drawdm";
pub const DRAWDD: &str = "drawdd";
pub const DRAWDY: &str = "drawdy";
pub const VIDVAL: &str = "vidval";
pub const LSTUDY: &str = "lstudy";
pub const GUSPEC: &str = "guspec";
pub const PRIMSTR: &str = "primstr";
pub const ADDSTR: &str = "addstr";
pub const DERVSTR: &str = "dervstr";

/// Names a generated output may use for its specimen id column, in order of preference.
pub const OUTPUT_SPECIMEN_ID_COLUMNS: [&str; 2] = ["guspec", "guspec_core"];

/// Column names generated outputs use for the registry's patient and protocol fields.
pub const OUTPUT_PATIENT_ID_COLUMN: &str = "ptid";
pub const OUTPUT_PROTOCOL_COLUMN: &str = "protocol";
pub const OUTPUT_NETWORK_COLUMN: &str = "network";
