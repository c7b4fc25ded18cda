/// Call-Info 报文头解析
///
/// 格式: `<uri>; param1=value1; param2="value2"; flag`
/// 例如: `<sip:example.com>; answer-after=1`
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static URI_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([^>]+)>").expect("valid Call-Info URI pattern"));

/// Call-Info 参数值
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Number(f64),
    Flag(bool),
}

impl ParamValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// 解析后的 Call-Info 报文头
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallInfoHeader {
    pub uri: String,
    /// answer-after 参数（秒），不放入 `params`
    pub answer_after_seconds: Option<u32>,
    /// 其他参数，键保持原样
    pub params: HashMap<String, ParamValue>,
}

impl CallInfoHeader {
    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }
}

fn is_answer_after_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key == "answer-after" || key == "answerafter"
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// 取值开头的十进制数字
fn leading_integer(value: &str) -> Option<u32> {
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    value[..end].parse().ok()
}

/// 解析单个 Call-Info 报文头的值
///
/// 没有尖括号 URI 或输入为空时返回 None
pub fn parse(header_value: &str) -> Option<CallInfoHeader> {
    if header_value.trim().is_empty() {
        return None;
    }

    let uri_match = URI_PATTERN.captures(header_value)?;
    let whole = uri_match.get(0)?;
    let uri = uri_match.get(1)?.as_str().to_string();

    let mut header = CallInfoHeader {
        uri,
        ..Default::default()
    };

    for segment in header_value[whole.end()..].split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let Some((key, value)) = segment.split_once('=') else {
            header.params.insert(segment.to_string(), ParamValue::Flag(true));
            continue;
        };

        let key = key.trim();
        let value = unquote(value.trim());

        if is_answer_after_key(key) {
            if let Some(delay) = leading_integer(value) {
                header.answer_after_seconds = Some(delay);
            }
            continue;
        }

        let value = match value.parse::<f64>() {
            Ok(n) if n.is_finite() => ParamValue::Number(n),
            _ => ParamValue::Text(value.to_string()),
        };
        header.params.insert(key.to_string(), value);
    }

    Some(header)
}

/// 解析一组 Call-Info 报文头，保持顺序，跳过无法解析的项
pub fn extract_all<I, S>(headers: I) -> Vec<CallInfoHeader>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    headers
        .into_iter()
        .filter_map(|value| parse(value.as_ref()))
        .collect()
}

/// 第一个携带 answer-after 的报文头给出的延迟（秒）
pub fn first_auto_answer_delay<I, S>(headers: I) -> Option<u32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    extract_all(headers)
        .into_iter()
        .find_map(|header| header.answer_after_seconds)
}

pub fn has_auto_answer<I, S>(headers: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    first_auto_answer_delay(headers).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer_after() {
        let header = parse("<sip:example.com>; answer-after=2").unwrap();
        assert_eq!(header.uri, "sip:example.com");
        assert_eq!(header.answer_after_seconds, Some(2));
        assert!(header.params.is_empty());
    }

    #[test]
    fn test_parse_answer_after_zero() {
        let header = parse("<sip:example.com>; answer-after=0").unwrap();
        assert_eq!(header.answer_after_seconds, Some(0));
    }

    #[test]
    fn test_parse_quoted_param_without_delay() {
        let header = parse("<sip:example.com>; purpose=\"icon\"").unwrap();
        assert_eq!(header.answer_after_seconds, None);
        assert_eq!(
            header.param("purpose"),
            Some(&ParamValue::Text("icon".into()))
        );
    }

    #[test]
    fn test_parse_multiple_params() {
        let header = parse("<sip:example.com>; answer-after=2; purpose=\"info\"; ttl=30").unwrap();
        assert_eq!(header.answer_after_seconds, Some(2));
        assert_eq!(header.param("purpose").and_then(|v| v.as_text()), Some("info"));
        assert_eq!(header.param("ttl").and_then(|v| v.as_number()), Some(30.0));
    }

    #[test]
    fn test_parse_spaces_around_equals() {
        let header = parse("<sip:example.com>; answer-after = 3 ").unwrap();
        assert_eq!(header.answer_after_seconds, Some(3));
    }

    #[test]
    fn test_parse_key_aliases() {
        assert_eq!(
            parse("<sip:example.com>;answerAfter=4").unwrap().answer_after_seconds,
            Some(4)
        );
        assert_eq!(
            parse("<sip:example.com>;Answer-After=1").unwrap().answer_after_seconds,
            Some(1)
        );
    }

    #[test]
    fn test_parse_bare_flag() {
        let header = parse("<sip:example.com>; auto").unwrap();
        assert_eq!(header.param("auto"), Some(&ParamValue::Flag(true)));
    }

    #[test]
    fn test_non_numeric_answer_after_ignored() {
        let header = parse("<sip:example.com>; answer-after=soon").unwrap();
        assert_eq!(header.answer_after_seconds, None);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse("not-a-header").is_none());
        assert!(parse("").is_none());
        assert!(parse("   ").is_none());
    }

    #[test]
    fn test_extract_all_skips_failures() {
        let headers = [
            "<sip:example.com>; answer-after=1",
            "garbage",
            "<sip:example2.com>; purpose=\"icon\"",
        ];
        let parsed = extract_all(headers);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].answer_after_seconds, Some(1));
        assert_eq!(parsed[1].uri, "sip:example2.com");
    }

    #[test]
    fn test_first_delay_wins() {
        let headers = ["<sip:a.example.com>; answer-after=2", "<sip:b.example.com>; answer-after=5"];
        assert_eq!(first_auto_answer_delay(headers), Some(2));
    }

    #[test]
    fn test_first_delay_skips_headers_without_param() {
        let headers = ["<sip:a.example.com>; purpose=icon", "<sip:b.example.com>; answer-after=5"];
        assert_eq!(first_auto_answer_delay(headers), Some(5));
        assert!(has_auto_answer(headers));
    }

    #[test]
    fn test_no_headers() {
        let headers: [&str; 0] = [];
        assert_eq!(first_auto_answer_delay(headers), None);
        assert!(!has_auto_answer(headers));
    }
}
