//! Injected-script rendering
//!
//! Every evaluation is wrapped in a small page-side harness that forwards
//! console output, the return value, or the thrown exception back to the
//! controller on three channels sharing one prefix.

use serde_json::Value;

use crate::{Error, Result};

/// Global installed in the page by the host; exposes `send(channel, ...args)`.
pub const PAGE_BRIDGE: &str = "__pagewire__";

/// Predicate used by selector waits
pub const SELECTOR_PRESENCE: &str =
    "function (selector) { return document.querySelector(selector) ? true : false; }";

/// Serialized page markup
pub const OUTER_HTML: &str = "function () { return document.documentElement.outerHTML; }";

/// Focus the element matched by a selector
pub const FOCUS_ELEMENT: &str = r#"function (selector) {
    var element = document.querySelector(selector);
    if (!element) { throw new Error('no element matches selector ' + selector); }
    element.focus();
    return true;
}"#;

/// Click the element matched by a selector
pub const CLICK_ELEMENT: &str = r#"function (selector) {
    var element = document.querySelector(selector);
    if (!element) { throw new Error('no element matches selector ' + selector); }
    element.click();
    return true;
}"#;

/// The three logical channels of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Return value
    Response,
    /// Thrown exception
    Error,
    /// Console output
    Log,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Response, ChannelKind::Error, ChannelKind::Log];

    /// Channel name suffix
    pub fn suffix(self) -> &'static str {
        match self {
            ChannelKind::Response => "js:response",
            ChannelKind::Error => "js:error",
            ChannelKind::Log => "js:log",
        }
    }

    /// Full channel name under a prefix
    pub fn channel(self, prefix: &str) -> String {
        format!("{}{}", prefix, self.suffix())
    }

    /// Split a channel name into its prefix and kind
    pub fn split(channel: &str) -> Option<(&str, ChannelKind)> {
        Self::ALL
            .iter()
            .find_map(|kind| channel.strip_suffix(kind.suffix()).map(|prefix| (prefix, *kind)))
    }
}

/// A function-shaped script bound to its arguments and reply channels
#[derive(Debug, Clone)]
pub struct InjectedScript {
    prefix: String,
    function: String,
    args: Vec<Value>,
    source: String,
}

impl InjectedScript {
    /// Wrap `function` for invocation with `args`, replying under `prefix`
    pub fn new<S: Into<String>>(prefix: S, function: &str, args: Vec<Value>) -> Result<Self> {
        let prefix = prefix.into();
        let function = function.trim();
        if function.is_empty() {
            return Err(Error::transport("cannot inject an empty script"));
        }

        let source = render(&prefix, function, &args)?;
        Ok(Self {
            prefix,
            function: function.to_string(),
            args,
            source,
        })
    }

    /// Channel prefix shared by the three reply channels
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The caller's function source
    pub fn function(&self) -> &str {
        &self.function
    }

    /// The caller's arguments
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Reply channel name for `kind`
    pub fn channel(&self, kind: ChannelKind) -> String {
        kind.channel(&self.prefix)
    }

    /// Complete expression to run in the page
    pub fn source(&self) -> &str {
        &self.source
    }
}

fn render(prefix: &str, function: &str, args: &[Value]) -> Result<String> {
    let log = js_string(&ChannelKind::Log.channel(prefix))?;
    let response = js_string(&ChannelKind::Response.channel(prefix))?;
    let error = js_string(&ChannelKind::Error.channel(prefix))?;
    let args = encode_args(args)?;

    Ok(format!(
        r#"(function () {{
    var bridge = window.{bridge};
    var log = console.log;
    console.log = function () {{
        bridge.send({log}, Array.prototype.slice.call(arguments).map(String));
    }};
    try {{
        var response = ({function})({args});
        bridge.send({response}, response);
    }} catch (e) {{
        var error = e instanceof Error ? e : new Error(String(e));
        bridge.send({error}, error.message, error.name, error.stack);
    }} finally {{
        console.log = log;
    }}
}})()"#,
        bridge = PAGE_BRIDGE,
    ))
}

/// Encode arguments as a comma-joined JSON list for a call site
pub fn encode_args(args: &[Value]) -> Result<String> {
    let mut encoded = Vec::with_capacity(args.len());
    for arg in args {
        let json = serde_json::to_string(arg)
            .map_err(|e| Error::transport(format!("failed to encode script argument: {}", e)))?;
        encoded.push(escape_line_terminators(json));
    }
    Ok(encoded.join(","))
}

fn js_string(value: &str) -> Result<String> {
    let json = serde_json::to_string(value)
        .map_err(|e| Error::transport(format!("failed to encode channel name: {}", e)))?;
    Ok(escape_line_terminators(json))
}

// U+2028/U+2029 are valid in JSON strings but terminate lines in older JS parsers.
fn escape_line_terminators(json: String) -> String {
    if !json.contains(['\u{2028}', '\u{2029}']) {
        return json;
    }
    json.replace('\u{2028}', "\\u2028").replace('\u{2029}', "\\u2029")
}

/// JavaScript truthiness of a JSON value
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_split() {
        assert_eq!(
            ChannelKind::split("abc|7|js:response"),
            Some(("abc|7|", ChannelKind::Response))
        );
        assert_eq!(ChannelKind::split("abc|7|js:log"), Some(("abc|7|", ChannelKind::Log)));
        assert_eq!(ChannelKind::split("abc|7|js:other"), None);
    }

    #[test]
    fn test_encode_args_preserves_shapes() {
        let args = vec![
            json!(1.5),
            json!("two"),
            json!(true),
            json!([1, "a", null]),
            json!({"nested": {"k": [false]}}),
        ];
        let encoded = encode_args(&args).unwrap();

        let reparsed: Vec<Value> = serde_json::from_str(&format!("[{}]", encoded)).unwrap();
        assert_eq!(reparsed, args);
    }

    #[test]
    fn test_encode_args_empty() {
        assert_eq!(encode_args(&[]).unwrap(), "");
    }

    #[test]
    fn test_encode_args_escapes_line_separators() {
        let encoded = encode_args(&[json!("a\u{2028}b")]).unwrap();
        assert!(!encoded.contains('\u{2028}'));
        assert!(encoded.contains("\\u2028"));
    }

    #[test]
    fn test_selector_argument_cannot_break_out() {
        let script = InjectedScript::new(
            "s|1|",
            SELECTOR_PRESENCE,
            vec![json!("a[title=\"x\"]'); alert(1); ('")],
        )
        .unwrap();
        assert!(script
            .source()
            .contains(r#"("a[title=\"x\"]'); alert(1); ('")"#));
    }

    #[test]
    fn test_wrapper_uses_prefixed_channels() {
        let script = InjectedScript::new("sess|3|", "() => 2 + 2", vec![]).unwrap();
        let source = script.source();

        assert!(source.contains(r#""sess|3|js:response""#));
        assert!(source.contains(r#""sess|3|js:error""#));
        assert!(source.contains(r#""sess|3|js:log""#));
        assert!(source.contains("(() => 2 + 2)()"));
        assert!(source.contains("finally"));
        assert_eq!(script.channel(ChannelKind::Error), "sess|3|js:error");
    }

    #[test]
    fn test_empty_script_rejected() {
        let result = InjectedScript::new("p|", "   ", vec![]);
        assert!(matches!(result, Err(Error::Transport(_))));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!(0.0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!(-1)));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }
}
