//! XML-RPC wire codec.
//!
//! Pure byte-in/byte-out helpers: [`encode_call`] / [`decode_response`] are
//! what [`crate::Client`] uses, and the mirror-image pair
//! [`decode_call`] / [`encode_response`] / [`encode_fault`] exists so test
//! harnesses can stand in for the appliance. The parser covers the subset of
//! XML-RPC the Chamelium emits (scalars, base64, arrays, structs, `<nil/>`,
//! faults); it is not a general XML parser.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::value::{Arg, Fault, RpcError, Value};

/// Encodes a `<methodCall>` request. [`Arg::Omitted`] arguments contribute no
/// `<param>` at all.
pub fn encode_call(method: &str, args: &[Arg]) -> Vec<u8> {
    let mut out = String::with_capacity(256);
    out.push_str("<?xml version=\"1.0\"?>\n<methodCall><methodName>");
    escape_into(&mut out, method);
    out.push_str("</methodName><params>");
    for arg in args {
        if matches!(arg, Arg::Omitted) {
            continue;
        }
        out.push_str("<param>");
        write_arg(&mut out, arg);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out.into_bytes()
}

/// Encodes a successful `<methodResponse>` carrying one value.
pub fn encode_response(value: &Value) -> Vec<u8> {
    let mut out = String::with_capacity(256);
    out.push_str("<?xml version=\"1.0\"?>\n<methodResponse><params><param>");
    write_value(&mut out, value);
    out.push_str("</param></params></methodResponse>\n");
    out.into_bytes()
}

/// Encodes a `<methodResponse>` carrying a fault.
pub fn encode_fault(fault: &Fault) -> Vec<u8> {
    let value = Value::Struct(vec![
        ("faultCode".to_string(), Value::Int(fault.code)),
        ("faultString".to_string(), Value::Str(fault.message.clone())),
    ]);
    let mut out = String::with_capacity(256);
    out.push_str("<?xml version=\"1.0\"?>\n<methodResponse><fault>");
    write_value(&mut out, &value);
    out.push_str("</fault></methodResponse>\n");
    out.into_bytes()
}

fn write_arg(out: &mut String, arg: &Arg) {
    match arg {
        Arg::Int(v) => write_value(out, &Value::Int(*v)),
        Arg::Bool(v) => write_value(out, &Value::Bool(*v)),
        Arg::Blob(v) => write_value(out, &Value::Bytes(v.clone())),
        Arg::Array(items) => {
            out.push_str("<value><array><data>");
            for item in items {
                // Omitted only makes sense positionally, not inside arrays.
                if !matches!(item, Arg::Omitted) {
                    write_arg(out, item);
                }
            }
            out.push_str("</data></array></value>");
        }
        Arg::Omitted => {}
    }
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(v) => {
            out.push_str("<int>");
            out.push_str(&v.to_string());
            out.push_str("</int>");
        }
        Value::Bool(v) => {
            out.push_str("<boolean>");
            out.push(if *v { '1' } else { '0' });
            out.push_str("</boolean>");
        }
        Value::Str(v) => {
            out.push_str("<string>");
            escape_into(out, v);
            out.push_str("</string>");
        }
        Value::Double(v) => {
            out.push_str("<double>");
            out.push_str(&v.to_string());
            out.push_str("</double>");
        }
        Value::Bytes(v) => {
            out.push_str("<base64>");
            out.push_str(&BASE64.encode(v));
            out.push_str("</base64>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                escape_into(out, name);
                out.push_str("</name>");
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let (entity, len) = if rest.starts_with("&amp;") {
            ('&', 5)
        } else if rest.starts_with("&lt;") {
            ('<', 4)
        } else if rest.starts_with("&gt;") {
            ('>', 4)
        } else if rest.starts_with("&quot;") {
            ('"', 6)
        } else if rest.starts_with("&apos;") {
            ('\'', 6)
        } else {
            ('&', 1)
        };
        out.push(entity);
        rest = &rest[len..];
    }
    out.push_str(rest);
    out
}

/// Decodes a `<methodResponse>`: the single return value, or
/// [`RpcError::Fault`] when the reply carries a `<fault>`.
pub fn decode_response(body: &[u8]) -> Result<Value, RpcError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| RpcError::Malformed("response is not valid utf-8".to_string()))?;
    let mut cur = Cursor::new(text);
    cur.skip_prolog();
    cur.expect_open("methodResponse")?;
    cur.skip_ws();
    if cur.try_open("fault") {
        let value = parse_value(&mut cur)?;
        let code = value.struct_field("faultCode")?.as_int()?;
        let message = value.struct_field("faultString")?.as_str()?.to_string();
        return Err(RpcError::Fault(Fault { code, message }));
    }
    cur.expect_open("params")?;
    cur.expect_open("param")?;
    let value = parse_value(&mut cur)?;
    Ok(value)
}

/// Decodes a `<methodCall>` into its method name and argument values.
///
/// The client never needs this; it is the entry point for appliance
/// simulators.
pub fn decode_call(body: &[u8]) -> Result<(String, Vec<Value>), RpcError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| RpcError::Malformed("request is not valid utf-8".to_string()))?;
    let mut cur = Cursor::new(text);
    cur.skip_prolog();
    cur.expect_open("methodCall")?;
    cur.expect_open("methodName")?;
    let method = unescape(cur.take_until("</methodName>")?);
    let mut args = Vec::new();
    cur.skip_ws();
    if cur.try_open("params") {
        loop {
            cur.skip_ws();
            if !cur.try_open("param") {
                break;
            }
            args.push(parse_value(&mut cur)?);
            cur.expect_close("param")?;
        }
    }
    Ok((method, args))
}

fn parse_value(cur: &mut Cursor<'_>) -> Result<Value, RpcError> {
    cur.expect_open("value")?;
    cur.skip_ws();
    // A `<value>` with no inner type tag is an implicit string.
    if !cur.rest().starts_with('<') {
        let text = unescape(cur.take_until("</value>")?);
        return Ok(Value::Str(text));
    }
    if cur.try_close("value") {
        return Ok(Value::Str(String::new()));
    }
    let tag = cur.open_tag()?;
    let value = match tag.as_str() {
        "__nil" => Value::Nil,
        "int" | "i4" => {
            let text = cur.take_until("</")?;
            cur.expect_close(&tag)?;
            Value::Int(
                text.trim()
                    .parse()
                    .map_err(|_| RpcError::Malformed(format!("bad int {text:?}")))?,
            )
        }
        "boolean" => {
            let text = cur.take_until("</boolean>")?;
            match text.trim() {
                "0" => Value::Bool(false),
                "1" => Value::Bool(true),
                other => return Err(RpcError::Malformed(format!("bad boolean {other:?}"))),
            }
        }
        "double" => {
            let text = cur.take_until("</double>")?;
            Value::Double(
                text.trim()
                    .parse()
                    .map_err(|_| RpcError::Malformed(format!("bad double {text:?}")))?,
            )
        }
        "string" => Value::Str(unescape(cur.take_until("</string>")?)),
        "base64" => {
            let text = cur.take_until("</base64>")?;
            let stripped: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            Value::Bytes(
                BASE64
                    .decode(stripped.as_bytes())
                    .map_err(|err| RpcError::Malformed(format!("bad base64 payload: {err}")))?,
            )
        }
        "array" => {
            cur.expect_open("data")?;
            let mut items = Vec::new();
            loop {
                cur.skip_ws();
                if cur.try_close("data") {
                    break;
                }
                items.push(parse_value(cur)?);
            }
            cur.expect_close("array")?;
            Value::Array(items)
        }
        "struct" => {
            let mut members = Vec::new();
            loop {
                cur.skip_ws();
                if cur.try_close("struct") {
                    break;
                }
                cur.expect_open("member")?;
                cur.expect_open("name")?;
                let name = unescape(cur.take_until("</name>")?);
                let member = parse_value(cur)?;
                cur.expect_close("member")?;
                members.push((name, member));
            }
            Value::Struct(members)
        }
        other => return Err(RpcError::Malformed(format!("unknown value type <{other}>"))),
    };
    cur.expect_close("value")?;
    Ok(value)
}

/// Tiny forward-only scanner over the response text. Self-closing `<nil/>`
/// is handled in [`Cursor::open_tag`]; attributes are tolerated and ignored.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn skip_prolog(&mut self) {
        self.skip_ws();
        if self.rest().starts_with("<?") {
            if let Some(end) = self.rest().find("?>") {
                self.pos += end + 2;
            }
        }
        self.skip_ws();
    }

    fn expect_open(&mut self, name: &str) -> Result<(), RpcError> {
        self.skip_ws();
        if self.try_open(name) {
            Ok(())
        } else {
            Err(RpcError::Malformed(format!(
                "expected <{name}> near {:?}",
                snippet(self.rest())
            )))
        }
    }

    fn try_open(&mut self, name: &str) -> bool {
        self.skip_ws();
        let rest = self.rest();
        let Some(tail) = rest.strip_prefix('<') else {
            return false;
        };
        let Some(tail) = tail.strip_prefix(name) else {
            return false;
        };
        // Accept `<name>` or `<name attr=...>`.
        if let Some(end) = tail.find('>') {
            let between = &tail[..end];
            if between.is_empty() || between.starts_with(char::is_whitespace) {
                self.pos += 1 + name.len() + end + 1;
                return true;
            }
        }
        false
    }

    fn try_close(&mut self, name: &str) -> bool {
        self.skip_ws();
        let close = format!("</{name}>");
        if self.rest().starts_with(&close) {
            self.pos += close.len();
            true
        } else {
            false
        }
    }

    fn expect_close(&mut self, name: &str) -> Result<(), RpcError> {
        if self.try_close(name) {
            Ok(())
        } else {
            Err(RpcError::Malformed(format!(
                "expected </{name}> near {:?}",
                snippet(self.rest())
            )))
        }
    }

    /// Consumes up to (and including) the given pattern, returning the text
    /// before it.
    fn take_until(&mut self, pat: &str) -> Result<&'a str, RpcError> {
        match self.rest().find(pat) {
            Some(idx) => {
                let text = &self.rest()[..idx];
                self.pos += idx;
                // `take_until("</")` leaves the close tag for `expect_close`.
                if pat != "</" {
                    self.pos += pat.len();
                }
                Ok(text)
            }
            None => Err(RpcError::Malformed(format!("missing {pat:?}"))),
        }
    }

    /// Reads the next opening tag name. `<nil/>` style self-closing tags are
    /// returned with the slash consumed and map to the `nil` branch.
    fn open_tag(&mut self) -> Result<String, RpcError> {
        self.skip_ws();
        let rest = self.rest();
        let Some(tail) = rest.strip_prefix('<') else {
            return Err(RpcError::Malformed(format!(
                "expected a tag near {:?}",
                snippet(rest)
            )));
        };
        let Some(end) = tail.find('>') else {
            return Err(RpcError::Malformed("unterminated tag".to_string()));
        };
        let raw = &tail[..end];
        self.pos += 1 + end + 1;
        let name = raw
            .trim_end_matches('/')
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_string();
        if raw.ends_with('/') {
            // Self-closing: the only one the grammar allows is <nil/>.
            if name == "nil" {
                return Ok("__nil".to_string());
            }
            return Err(RpcError::Malformed(format!(
                "unexpected self-closing tag <{raw}>"
            )));
        }
        Ok(name)
    }
}

fn snippet(text: &str) -> &str {
    &text[..text.len().min(40)]
}
