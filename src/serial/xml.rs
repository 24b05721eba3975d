//! Minimal XML element writer and parser for the markup archive format.
//!
//! The writer builds documents by pushing strings, one element per parameter
//! field; vectors are whitespace-separated text, matrices carry `rows`/`cols`
//! attributes. The parser is the cursor-based inverse and reports malformed
//! input instead of guessing.

use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Incremental XML document writer.
pub struct XmlWriter {
    buf: String,
    depth: usize,
}

impl XmlWriter {
    pub fn new() -> Self {
        XmlWriter {
            buf: String::new(),
            depth: 0,
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.buf.push_str("  ");
        }
    }

    /// Open a container element.
    pub fn open(&mut self, name: &str) {
        self.indent();
        self.buf.push_str(&format!("<{}>\n", name));
        self.depth += 1;
    }

    /// Close a container element.
    pub fn close(&mut self, name: &str) {
        self.depth -= 1;
        self.indent();
        self.buf.push_str(&format!("</{}>\n", name));
    }

    /// Write a scalar element: `<name>value</name>`.
    pub fn scalar(&mut self, name: &str, value: f64) {
        self.indent();
        self.buf.push_str(&format!("<{}>{}</{}>\n", name, value, name));
    }

    /// Write a vector element with an `n` attribute and whitespace-separated
    /// entries.
    pub fn vector(&mut self, name: &str, v: &ArrayView1<f64>) {
        self.indent();
        let body: Vec<String> = v.iter().map(|x| format!("{}", x)).collect();
        self.buf.push_str(&format!(
            "<{} n=\"{}\">{}</{}>\n",
            name,
            v.len(),
            body.join(" "),
            name
        ));
    }

    /// Write a matrix element in row-major text with `rows`/`cols` attributes.
    pub fn matrix(&mut self, name: &str, m: &ArrayView2<f64>) {
        self.indent();
        let body: Vec<String> = m.iter().map(|x| format!("{}", x)).collect();
        self.buf.push_str(&format!(
            "<{} rows=\"{}\" cols=\"{}\">{}</{}>\n",
            name,
            m.nrows(),
            m.ncols(),
            body.join(" "),
            name
        ));
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// A parsed XML element.
#[derive(Debug, Clone)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Parse a document consisting of a single root element.
    pub fn parse(text: &str) -> Result<XmlNode> {
        let mut p = Parser { s: text, pos: 0 };
        let node = p.parse_element()?;
        p.skip_whitespace();
        if p.pos != p.s.len() {
            return Err(Error::xml("trailing content after root element"));
        }
        Ok(node)
    }

    /// Look up a direct child element by name.
    pub fn child(&self, name: &str) -> Result<&XmlNode> {
        self.children
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::xml(format!("missing <{}> element", name)))
    }

    /// All direct children with the given name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn attr(&self, name: &str) -> Result<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| Error::xml(format!("missing {} attribute on <{}>", name, self.name)))
    }

    pub fn attr_usize(&self, name: &str) -> Result<usize> {
        self.attr(name)?
            .parse()
            .map_err(|_| Error::xml(format!("bad {} attribute on <{}>", name, self.name)))
    }

    /// Interpret the element text as a single float.
    pub fn scalar(&self) -> Result<f64> {
        parse_f64(self.text.trim(), &self.name)
    }

    /// Interpret the element text as a float vector, validated against the
    /// `n` attribute.
    pub fn vector(&self) -> Result<Array1<f64>> {
        let n = self.attr_usize("n")?;
        let values = self.float_list()?;
        if values.len() != n {
            return Err(Error::xml(format!(
                "<{}> declares {} entries but has {}",
                self.name,
                n,
                values.len()
            )));
        }
        Ok(Array1::from_vec(values))
    }

    /// Interpret the element text as a row-major matrix using the
    /// `rows`/`cols` attributes.
    pub fn matrix(&self) -> Result<Array2<f64>> {
        let rows = self.attr_usize("rows")?;
        let cols = self.attr_usize("cols")?;
        let values = self.float_list()?;
        if values.len() != rows * cols {
            return Err(Error::xml(format!(
                "<{}> declares {}x{} but has {} entries",
                self.name,
                rows,
                cols,
                values.len()
            )));
        }
        Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| Error::xml(format!("bad matrix shape in <{}>: {}", self.name, e)))
    }

    fn float_list(&self) -> Result<Vec<f64>> {
        self.text
            .split_whitespace()
            .map(|tok| parse_f64(tok, &self.name))
            .collect()
    }
}

fn parse_f64(tok: &str, element: &str) -> Result<f64> {
    tok.parse()
        .map_err(|_| Error::xml(format!("bad float {:?} in <{}>", tok, element)))
}

struct Parser<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.s[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.s.len() - trimmed.len();
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            Ok(())
        } else {
            Err(Error::xml(format!(
                "expected {:?} at offset {}",
                token, self.pos
            )))
        }
    }

    fn read_name(&mut self) -> Result<String> {
        let rest = self.rest();
        let end = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        if end == 0 {
            return Err(Error::xml(format!("expected name at offset {}", self.pos)));
        }
        let name = rest[..end].to_string();
        self.pos += end;
        Ok(name)
    }

    fn parse_attrs(&mut self) -> Result<Vec<(String, String)>> {
        let mut attrs = Vec::new();
        loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with('>') || rest.starts_with("/>") || rest.is_empty() {
                return Ok(attrs);
            }
            let key = self.read_name()?;
            self.expect("=\"")?;
            let rest = self.rest();
            let end = rest
                .find('"')
                .ok_or_else(|| Error::xml("unterminated attribute value"))?;
            attrs.push((key, rest[..end].to_string()));
            self.pos += end + 1;
        }
    }

    fn parse_element(&mut self) -> Result<XmlNode> {
        self.skip_whitespace();
        self.expect("<")?;
        let name = self.read_name()?;
        let attrs = self.parse_attrs()?;

        if self.rest().starts_with("/>") {
            self.pos += 2;
            return Ok(XmlNode {
                name,
                attrs,
                text: String::new(),
                children: Vec::new(),
            });
        }
        self.expect(">")?;

        let mut text = String::new();
        let mut children = Vec::new();
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Err(Error::xml(format!("unterminated <{}> element", name)));
            }
            if rest.starts_with("</") {
                break;
            }
            if rest.starts_with('<') {
                children.push(self.parse_element()?);
            } else {
                let end = rest.find('<').unwrap_or(rest.len());
                text.push_str(&rest[..end]);
                self.pos += end;
            }
        }

        self.expect("</")?;
        let close = self.read_name()?;
        if close != name {
            return Err(Error::xml(format!(
                "mismatched close tag </{}> for <{}>",
                close, name
            )));
        }
        self.skip_whitespace();
        self.expect(">")?;

        Ok(XmlNode {
            name,
            attrs,
            text: text.trim().to_string(),
            children,
        })
    }
}
