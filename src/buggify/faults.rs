//! Named fault injection sites

pub mod object_store {
    pub const PUT_FAIL: &str = "object_store.put_fail";
    pub const GET_FAIL: &str = "object_store.get_fail";
    pub const GET_CORRUPT: &str = "object_store.get_corrupt";
    pub const DELETE_FAIL: &str = "object_store.delete_fail";
    pub const COPY_FAIL: &str = "object_store.copy_fail";
    pub const LIST_INCOMPLETE: &str = "object_store.list_incomplete";
    pub const TIMEOUT: &str = "object_store.timeout";
}

pub mod archive {
    pub const ARCHIVE_FAIL: &str = "archive.fail";
}

/// Every fault id with its default probability
pub const ALL_FAULTS: &[(&str, f64)] = &[
    (object_store::PUT_FAIL, 0.01),
    (object_store::GET_FAIL, 0.01),
    (object_store::GET_CORRUPT, 0.001),
    (object_store::DELETE_FAIL, 0.01),
    (object_store::COPY_FAIL, 0.01),
    (object_store::LIST_INCOMPLETE, 0.02),
    (object_store::TIMEOUT, 0.005),
    (archive::ARCHIVE_FAIL, 0.01),
];
