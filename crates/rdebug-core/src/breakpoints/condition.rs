//! Hit conditions and log-point templates.

use std::str::FromStr;

/// Predicate over a breakpoint's hit counter.
///
/// A bare number `N` means "from the N-th hit on" (`>= N`). Otherwise an
/// operator followed by a number: `==`, `!=` (or `~=`), `>`, `>=`, `<`, `<=`
/// and `%` (every N-th hit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitCondition
{
    Eq(u64),
    Ne(u64),
    Gt(u64),
    Ge(u64),
    Lt(u64),
    Le(u64),
    Every(u64),
}

impl HitCondition
{
    /// Does the `hits`-th hit satisfy the condition?
    #[must_use]
    pub const fn matches(self, hits: u64) -> bool
    {
        match self {
            Self::Eq(n) => hits == n,
            Self::Ne(n) => hits != n,
            Self::Gt(n) => hits > n,
            Self::Ge(n) => hits >= n,
            Self::Lt(n) => hits < n,
            Self::Le(n) => hits <= n,
            Self::Every(n) => n != 0 && hits % n == 0,
        }
    }
}

impl FromStr for HitCondition
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let s = s.trim();
        let (op, rest) = ["==", "!=", "~=", ">=", "<=", ">", "<", "%"]
            .iter()
            .find_map(|op| s.strip_prefix(op).map(|rest| (*op, rest)))
            .unwrap_or(("", s));

        let n: u64 = rest
            .trim()
            .parse()
            .map_err(|_| format!("invalid hit condition: {s}"))?;

        Ok(match op {
            "==" => Self::Eq(n),
            "!=" | "~=" => Self::Ne(n),
            ">" => Self::Gt(n),
            "<=" => Self::Le(n),
            "<" => Self::Lt(n),
            "%" => Self::Every(n),
            _ => Self::Ge(n),
        })
    }
}

/// One piece of a log-point message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSegment
{
    /// Copied verbatim.
    Text(String),
    /// Evaluated in the top frame and substituted.
    Expr(String),
}

/// Parsed log-point message: literal text with `{expression}` holes.
///
/// `{{` and `}}` produce literal braces. An unterminated `{` is kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTemplate
{
    segments: Vec<LogSegment>,
}

impl LogTemplate
{
    /// Parse a template.
    #[must_use]
    pub fn parse(template: &str) -> Self
    {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    text.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut expr = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        expr.push(c);
                    }
                    if closed {
                        if !text.is_empty() {
                            segments.push(LogSegment::Text(std::mem::take(&mut text)));
                        }
                        segments.push(LogSegment::Expr(expr.trim().to_string()));
                    } else {
                        text.push('{');
                        text.push_str(&expr);
                    }
                }
                c => text.push(c),
            }
        }
        if !text.is_empty() {
            segments.push(LogSegment::Text(text));
        }
        Self { segments }
    }

    /// Parsed segments.
    #[must_use]
    pub fn segments(&self) -> &[LogSegment]
    {
        &self.segments
    }

    /// Render with `eval` producing the text for each expression.
    pub fn render<F>(&self, mut eval: F) -> String
    where
        F: FnMut(&str) -> String,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                LogSegment::Text(text) => out.push_str(text),
                LogSegment::Expr(expr) => out.push_str(&eval(expr)),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_bare_number_is_threshold()
    {
        let cond: HitCondition = "3".parse().unwrap();
        assert!(!cond.matches(2));
        assert!(cond.matches(3));
        assert!(cond.matches(4));
    }

    #[test]
    fn test_operators()
    {
        assert_eq!("== 2".parse(), Ok(HitCondition::Eq(2)));
        assert_eq!("~=2".parse(), Ok(HitCondition::Ne(2)));
        assert_eq!("<= 5".parse(), Ok(HitCondition::Le(5)));
        assert_eq!("% 3".parse(), Ok(HitCondition::Every(3)));
        assert!(HitCondition::Every(3).matches(6));
        assert!(!HitCondition::Every(0).matches(0));
        assert!("abc".parse::<HitCondition>().is_err());
    }

    #[test]
    fn test_template_interpolation()
    {
        let template = LogTemplate::parse("x = {x}, y = {{literal}}");
        let rendered = template.render(|expr| format!("<{expr}>"));
        assert_eq!(rendered, "x = <x>, y = {literal}");
    }

    #[test]
    fn test_unterminated_brace_is_text()
    {
        let template = LogTemplate::parse("value {oops");
        assert_eq!(template.segments(), &[LogSegment::Text("value {oops".to_string())]);
    }
}
