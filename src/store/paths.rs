use crate::error::AppError;

pub const REQUESTS: &str = "requests";
pub const MESSAGES: &str = "messages";
pub const CONDUCTOR_LOCATIONS: &str = "conductor_locations";

pub const RIDER_INDEX: &str = "rider_id";
pub const CONDUCTOR_INDEX: &str = "accepted_by";

const FORBIDDEN_KEY_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

pub fn validate_key(key: &str) -> Result<(), AppError> {
    if key.is_empty() {
        return Err(AppError::BadRequest("key cannot be empty".to_string()));
    }

    if key.contains(FORBIDDEN_KEY_CHARS) {
        return Err(AppError::BadRequest(format!(
            "key {key:?} contains one of / . # $ [ ]"
        )));
    }

    Ok(())
}

pub fn validate_path(path: &str) -> Result<(), AppError> {
    if path.is_empty() || path.split('/').any(str::is_empty) {
        return Err(AppError::BadRequest(format!("invalid store path {path:?}")));
    }
    Ok(())
}

pub fn request(request_id: &str) -> Result<String, AppError> {
    validate_key(request_id)?;
    Ok(format!("{REQUESTS}/{request_id}"))
}

pub fn messages(request_id: &str) -> Result<String, AppError> {
    validate_key(request_id)?;
    Ok(format!("{MESSAGES}/{request_id}"))
}

pub fn message(request_id: &str, message_key: &str) -> Result<String, AppError> {
    validate_key(message_key)?;
    Ok(format!("{}/{message_key}", messages(request_id)?))
}

pub fn conductor_location(conductor_id: &str) -> Result<String, AppError> {
    validate_key(conductor_id)?;
    Ok(format!("{CONDUCTOR_LOCATIONS}/{conductor_id}"))
}

pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once('/')
}

pub fn is_within(written: &str, watched: &str) -> bool {
    written == watched
        || (written.len() > watched.len()
            && written.starts_with(watched)
            && written.as_bytes()[watched.len()] == b'/')
}

#[cfg(test)]
mod tests {
    use super::{is_within, message, request, split_parent, validate_path};

    #[test]
    fn keys_with_reserved_characters_are_rejected() {
        assert_eq!(request("abc-123").unwrap(), "requests/abc-123");
        assert!(request("").is_err());
        assert!(request("a/b").is_err());
        assert!(request("a.b").is_err());
        assert!(message("r1", "m$1").is_err());
    }

    #[test]
    fn nested_paths_are_within_their_ancestors() {
        assert!(is_within("messages/r1/m1", "messages/r1"));
        assert!(is_within("messages/r1", "messages/r1"));
        assert!(!is_within("messages/r10/m1", "messages/r1"));
        assert!(!is_within("messages", "messages/r1"));
    }

    #[test]
    fn split_and_validate() {
        assert_eq!(split_parent("messages/r1/m1"), Some(("messages/r1", "m1")));
        assert_eq!(split_parent("requests"), None);
        assert!(validate_path("requests/r1").is_ok());
        assert!(validate_path("requests//r1").is_err());
        assert!(validate_path("/requests").is_err());
    }
}
