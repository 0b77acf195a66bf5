//! HTML directory listings

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::{
    fs,
    io::{self, BufWriter, Write},
    path::Path,
};

/// Bytes escaped inside an `href` path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'/');

/// Streams an `Index of` page for `dir` into `out` and returns the number of
/// bytes written.
///
/// `display` is the request path shown in the title and used as the base of
/// every link. Entries are sorted by name; directories get a trailing `/`.
pub fn write_listing<W: Write>(out: &mut W, dir: &Path, display: &str) -> io::Result<u64> {
    let mut names = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let is_dir = entry.path().is_dir();
            (entry.file_name().to_string_lossy().into_owned(), is_dir)
        })
        .collect::<Vec<_>>();
    names.sort_unstable();

    let display = if display.is_empty() { "/" } else { display };
    let title = html_escape(display);
    let base = display
        .trim_end_matches('/')
        .split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/");

    let mut out = CountingWriter::new(BufWriter::new(out));

    write!(
        out,
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>Index of {title}</title>\
         </head><body><h1>Index of {title}</h1><ul>\n"
    )?;

    for (name, is_dir) in &names {
        let href = utf8_percent_encode(name, SEGMENT).to_string();
        let suffix = if *is_dir { "/" } else { "" };

        writeln!(
            out,
            "<li><a href=\"{}/{}{suffix}\">{}{suffix}</a></li>",
            html_escape(&base),
            html_escape(&href),
            html_escape(name),
        )?;
    }

    out.write_all(b"</ul></body></html>\n")?;
    out.flush()?;

    Ok(out.count)
}

fn html_escape(src: &str) -> String {
    let mut result = String::with_capacity(src.len());

    for c in src.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            other => result.push(other),
        }
    }

    result
}

struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod listing_tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn escape() {
        let cases = [
            ("plain", "plain"),
            ("a&b", "a&amp;b"),
            ("<script>", "&lt;script&gt;"),
            ("say \"hi\"", "say &quot;hi&quot;"),
        ];

        for (src, expected) in cases {
            assert_eq!(html_escape(src), expected);
        }
    }

    #[test]
    fn listing() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b <x>.txt"), b"").unwrap();
        fs::write(dir.path().join("a.txt"), b"").unwrap();

        let mut out = Vec::new();
        let written = write_listing(&mut out, dir.path(), "/docs/").unwrap();
        let html = String::from_utf8(out).unwrap();

        assert_eq!(written, html.len() as u64);
        assert!(html.contains("<title>Index of /docs/</title>"));
        assert!(html.contains("<li><a href=\"/docs/a.txt\">a.txt</a></li>"));
        assert!(html.contains("<li><a href=\"/docs/b%20%3Cx%3E.txt\">b &lt;x&gt;.txt</a></li>"));
        assert!(html.contains("<li><a href=\"/docs/sub/\">sub/</a></li>"));
        assert!(!html.contains("href=\"/docs/.\""));

        let a = html.find("a.txt").unwrap();
        let sub = html.find("sub/").unwrap();
        assert!(a < sub);
        assert!(html.ends_with("</ul></body></html>\n"));
    }

    #[test]
    fn special_characters_in_directory_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f.txt"), b"").unwrap();

        let mut out = Vec::new();
        write_listing(&mut out, dir.path(), "/q?a #b/c&d/").unwrap();
        let html = String::from_utf8(out).unwrap();

        assert!(html.contains("<title>Index of /q?a #b/c&amp;d/</title>"));
        assert!(html.contains("<li><a href=\"/q%3Fa%20%23b/c&amp;d/f.txt\">f.txt</a></li>"));
    }

    #[test]
    fn root_listing() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("f"), b"").unwrap();

        let mut out = Vec::new();
        write_listing(&mut out, dir.path(), "/").unwrap();
        let html = String::from_utf8(out).unwrap();

        assert!(html.contains("<title>Index of /</title>"));
        assert!(html.contains("<a href=\"/f\">f</a>"));
    }
}
