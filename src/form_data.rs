use std::collections::BTreeMap;

/// Parse URL-encoded form data into key-value pairs
pub fn parse_form_data(data: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();

    for pair in data.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            let key = key.replace('+', " ");
            let value = value.replace('+', " ");
            let decoded_key = urlencoding::decode(&key).map(|k| k.into_owned()).unwrap_or(key.clone());
            let decoded_value = urlencoding::decode(&value)
                .map(|v| v.into_owned())
                .unwrap_or(value.clone());
            params.insert(decoded_key, decoded_value);
        }
    }

    params
}

/// Encode pairs as `application/x-www-form-urlencoded`, keeping their order.
pub fn encode_form_data(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Whether a body looks like form data rather than JSON or free text.
pub(crate) fn looks_like_form(body: &str) -> bool {
    body.contains('=') && !body.trim_start().starts_with('{') && !body.contains(char::is_whitespace)
}
