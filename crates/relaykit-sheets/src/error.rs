use thiserror::Error;

pub type Result<T> = std::result::Result<T, SheetsError>;

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("missing Feishu credentials: {0}")]
    Credentials(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Feishu request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// HTTP 200 with a non-zero `code` in the envelope
    #[error("Feishu API error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("sheet '{0}' not found in the spreadsheet")]
    SheetNotFound(String),

    #[error("either a sheet id or a sheet name must be provided")]
    MissingSheet,

    #[error("cannot read data: the sheet type is {0}, not a regular spreadsheet")]
    NotASheet(String),

    #[error("invalid column '{0}', expected letters such as A or AB")]
    InvalidColumn(String),

    #[error("malformed Feishu response: {0}")]
    Decode(String),
}
