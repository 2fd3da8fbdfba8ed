use crate::client::FlickrError;
use crate::types::{PhotoId, TicketId};

/// A photo ready to be sent to the upload endpoint.
pub struct UploadRequest {
    pub file_name: String,
    pub title: String,
    pub body: reqwest::Body,
    pub content_length: Option<u64>,
    /// Ask the service for a ticket instead of waiting for the photo id.
    pub asynchronous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadReceipt {
    Photo(PhotoId),
    Ticket(TicketId),
}

// The upload endpoint only speaks XML:
//   <rsp stat="ok"><photoid>123</photoid></rsp>
//   <rsp stat="ok"><ticketid>abc</ticketid></rsp>
//   <rsp stat="fail"><err code="5" msg="Filetype was not recognised" /></rsp>
pub(crate) fn parse_upload_response(body: &str) -> Result<UploadReceipt, FlickrError> {
    let stat = attribute(body, "rsp", "stat").ok_or(FlickrError::MalformedUpload("rsp"))?;
    if stat != "ok" {
        let code = attribute(body, "err", "code")
            .and_then(|code| code.parse().ok())
            .unwrap_or_default();
        let message = decode_entities(attribute(body, "err", "msg").unwrap_or_default());
        return Err(FlickrError::Api { code, message });
    }
    if let Some(ticket) = element_text(body, "ticketid") {
        return Ok(UploadReceipt::Ticket(TicketId(ticket.to_string())));
    }
    element_text(body, "photoid")
        .map(|id| UploadReceipt::Photo(PhotoId(id.to_string())))
        .ok_or(FlickrError::MalformedUpload("photoid"))
}

fn element_text<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let start = body.find(&open)?;
    let after_open = start + body[start..].find('>')? + 1;
    let close = format!("</{tag}>");
    let end = after_open + body[after_open..].find(&close)?;
    Some(body[after_open..end].trim())
}

fn attribute<'a>(body: &'a str, tag: &str, name: &str) -> Option<&'a str> {
    let open = format!("<{tag}");
    let start = body.find(&open)?;
    let element = &body[start..start + body[start..].find('>')?];
    let marker = format!(" {name}=\"");
    let value_start = element.find(&marker)? + marker.len();
    let value_len = element[value_start..].find('"')?;
    Some(&element[value_start..value_start + value_len])
}

fn decode_entities(raw: &str) -> String {
    let mut decoded = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let replacement = rest.find(';').and_then(|end| {
            let ch = match &rest[1..end] {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                entity => entity
                    .strip_prefix("#x")
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                    .and_then(char::from_u32),
            }?;
            Some((ch, end + 1))
        });
        match replacement {
            Some((ch, consumed)) => {
                decoded.push(ch);
                rest = &rest[consumed..];
            }
            None => {
                decoded.push('&');
                rest = &rest[1..];
            }
        }
    }
    decoded.push_str(rest);
    decoded
}
