// Claimdesk - Expense Reimbursement Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod auth;
pub mod claims;
pub mod db;
pub mod documents;
pub mod error;
pub mod limits;
pub mod ocr;
pub mod org;
pub mod pdf;
pub mod validator;

// Re-export commonly used types
pub use auth::{
    hash_password, login, session_from_cookie_header, sign_token, verify_password, verify_token,
    AuthConfig, Role, SessionClaims, TOKEN_COOKIE,
};
pub use claims::{approve, get, list, reject, submit, Claim, ClaimStatus, Expense};
pub use db::{get_events_for_entity, insert_event, setup_database, Event};
pub use documents::{
    content_hash, get_document, link_documents, save_document, Document, DocumentStorage,
    LocalStorage,
};
pub use error::{AppError, AppResult};
pub use limits::{
    limits_for, list_limits, set_limit, Category, Limit, LimitCategory, LimitSet,
    LimitWithDesignation, Period,
};
pub use ocr::{
    extract_or_placeholder, parse_extraction_response, ExtractedExpense, ReceiptExtractor,
};
pub use org::{
    create_designation, create_employee, designation_of, get_employee, list_designations,
    list_employees, Designation, DesignationWithCount, Employee, NewEmployee,
};
pub use pdf::{render_claim_pdf, DEFAULT_CURRENCY};
pub use validator::{parse_expense_date, validate, ExpenseDraft};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
