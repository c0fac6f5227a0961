//! Input validation for message submission and listing

use ams_common::{
    MessageFilter, MessageStatus, NewMessage, DEFAULT_PAGE_SIZE, MAX_CONTENT_LENGTH, MAX_PAGE_SIZE,
};
use chrono::NaiveDate;

use crate::error::{ApiError, Result};
use crate::model::{CreateMessageRequest, ListMessagesQuery};

/// E.164 allows at most 15 digits
const MAX_PHONE_DIGITS: usize = 15;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn validate_phone_number(phone: &str) -> Result<()> {
    if phone.is_empty() {
        return Err(ApiError::validation("phone number is required"));
    }
    let Some(digits) = phone.strip_prefix('+') else {
        return Err(ApiError::validation("phone number must begin with '+'"));
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::validation(
            "phone number must contain only digits after '+' prefix",
        ));
    }
    if digits.len() > MAX_PHONE_DIGITS {
        return Err(ApiError::validation(format!(
            "phone number must have at most {} digits",
            MAX_PHONE_DIGITS
        )));
    }
    Ok(())
}

pub fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(ApiError::validation("message content is required"));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(ApiError::validation(format!(
            "message content too long, maximum length is {} characters",
            MAX_CONTENT_LENGTH
        )));
    }
    Ok(())
}

pub fn validate_new_message(request: &CreateMessageRequest) -> Result<NewMessage> {
    let to = request.to.as_deref().unwrap_or_default();
    let content = request.content.as_deref().unwrap_or_default();

    validate_content(content)?;
    validate_phone_number(to)?;

    Ok(NewMessage::new(to, content))
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(field: &str, value: &Option<String>) -> Result<Option<NaiveDate>> {
    present(value)
        .map(|v| {
            NaiveDate::parse_from_str(v, DATE_FORMAT)
                .map_err(|_| ApiError::validation(format!("{} must be in YYYY-MM-DD format", field)))
        })
        .transpose()
}

/// Missing or non-positive values fall back to `default`.
fn parse_page_number(value: &Option<String>, default: u32) -> Result<u32> {
    let Some(raw) = present(value) else {
        return Ok(default);
    };
    let n: i64 = raw
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid request format"))?;
    if n <= 0 {
        return Ok(default);
    }
    u32::try_from(n).map_err(|_| ApiError::bad_request("Invalid request format"))
}

pub fn parse_filter(query: &ListMessagesQuery) -> Result<MessageFilter> {
    let status = present(&query.status)
        .map(|s| {
            s.parse::<MessageStatus>()
                .map_err(|_| ApiError::validation("status must be one of: pending, sent, failed"))
        })
        .transpose()?;

    let start_date = parse_date("start_date", &query.start_date)?;
    let end_date = parse_date("end_date", &query.end_date)?;
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if end < start {
            return Err(ApiError::validation("end_date must not be before start_date"));
        }
    }

    let page = parse_page_number(&query.page, 1)?;
    let page_size = parse_page_number(&query.page_size, DEFAULT_PAGE_SIZE)?;
    if page_size > MAX_PAGE_SIZE {
        return Err(ApiError::validation(format!(
            "page size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    Ok(MessageFilter {
        status,
        start_date,
        end_date,
        page,
        page_size,
    })
}
