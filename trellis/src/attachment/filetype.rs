//! File-type detection: MIME type first, filename extension when
//! inconclusive, magic-byte sniffing as the last resort.

/// Coarse file type driving the content pipeline's dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileType {
    Image,
    Audio,
    Pdf,
    Word,
    Excel,
    Ppt,
    Csv,
    Json,
    Xml,
    Text,
    Binary,
    Unknown,
}

/// Maps a MIME type to a file type. Returns `Unknown` when inconclusive.
pub fn from_content_type(content_type: &str) -> FileType {
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match ct.as_str() {
        "" => FileType::Unknown,
        "application/pdf" => FileType::Pdf,
        "application/json" | "application/x-ndjson" => FileType::Json,
        "application/xml" | "text/xml" => FileType::Xml,
        "text/csv" | "text/tab-separated-values" => FileType::Csv,
        "application/msword"
        | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            FileType::Word
        }
        "application/vnd.ms-excel"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => FileType::Excel,
        "application/vnd.ms-powerpoint"
        | "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
            FileType::Ppt
        }
        "application/octet-stream" => FileType::Unknown,
        _ => {
            if ct.starts_with("image/") {
                FileType::Image
            } else if ct.starts_with("audio/") {
                FileType::Audio
            } else if ct.starts_with("text/") || ct.ends_with("+json") || ct.ends_with("+xml") {
                if ct.ends_with("+json") {
                    FileType::Json
                } else if ct.ends_with("+xml") {
                    FileType::Xml
                } else {
                    FileType::Text
                }
            } else {
                FileType::Unknown
            }
        }
    }
}

/// Maps a filename extension to a file type. Covers common code, config,
/// and document suffixes; everything else is `Unknown`.
pub fn from_extension(filename: &str) -> FileType {
    let ext = filename
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        // images
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "tiff" | "ico" | "svg" => FileType::Image,
        // audio
        "mp3" | "wav" | "ogg" | "oga" | "m4a" | "flac" | "aac" | "opus" => FileType::Audio,
        // documents
        "pdf" => FileType::Pdf,
        "doc" | "docx" | "rtf" | "odt" => FileType::Word,
        "xls" | "xlsx" | "ods" => FileType::Excel,
        "ppt" | "pptx" | "odp" => FileType::Ppt,
        "csv" | "tsv" => FileType::Csv,
        "json" | "jsonl" | "ndjson" | "geojson" => FileType::Json,
        "xml" | "xsd" | "xsl" | "plist" => FileType::Xml,
        // plain text and markup
        "txt" | "md" | "markdown" | "rst" | "adoc" | "log" | "text" => FileType::Text,
        // code
        "rs" | "go" | "py" | "js" | "jsx" | "ts" | "tsx" | "java" | "kt" | "scala" | "c" | "h"
        | "cc" | "cpp" | "hpp" | "cs" | "rb" | "php" | "swift" | "m" | "mm" | "lua" | "pl"
        | "r" | "jl" | "dart" | "zig" | "ex" | "exs" | "erl" | "hs" | "clj" | "el" | "vim" => {
            FileType::Text
        }
        // scripts and shells
        "sh" | "bash" | "zsh" | "fish" | "ps1" | "bat" | "cmd" => FileType::Text,
        // config
        "yaml" | "yml" | "toml" | "ini" | "conf" | "cfg" | "env" | "properties" | "editorconfig"
        | "gitignore" | "dockerfile" | "makefile" | "lock" => FileType::Text,
        // data and query
        "sql" | "graphql" | "proto" | "html" | "htm" | "css" | "scss" | "less" | "vue"
        | "svelte" => FileType::Text,
        // known binaries
        "zip" | "tar" | "gz" | "bz2" | "xz" | "7z" | "rar" | "exe" | "dll" | "so" | "dylib"
        | "bin" | "wasm" | "class" | "o" | "a" => FileType::Binary,
        _ => FileType::Unknown,
    }
}

/// Full detection: MIME type, then extension, then magic bytes when provided.
pub fn detect(content_type: &str, filename: &str, data: Option<&[u8]>) -> FileType {
    let by_mime = from_content_type(content_type);
    if by_mime != FileType::Unknown {
        return by_mime;
    }
    let by_ext = from_extension(filename);
    if by_ext != FileType::Unknown {
        return by_ext;
    }
    if let Some(bytes) = data {
        if let Some(kind) = infer::get(bytes) {
            return from_content_type(kind.mime_type());
        }
        // Printable UTF-8 with no magic signature is treated as text.
        if std::str::from_utf8(bytes).is_ok() {
            return FileType::Text;
        }
        return FileType::Binary;
    }
    FileType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_takes_precedence() {
        assert_eq!(
            detect("image/png", "report.pdf", None),
            FileType::Image
        );
        assert_eq!(detect("application/pdf", "", None), FileType::Pdf);
        assert_eq!(detect("text/x-go; charset=utf-8", "", None), FileType::Text);
    }

    #[test]
    fn extension_used_when_mime_inconclusive() {
        assert_eq!(detect("", "main.rs", None), FileType::Text);
        assert_eq!(
            detect("application/octet-stream", "deck.pptx", None),
            FileType::Ppt
        );
        assert_eq!(detect("", "photo.JPEG", None), FileType::Image);
        assert_eq!(detect("", "data.jsonl", None), FileType::Json);
    }

    #[test]
    fn sniffing_covers_signature_and_utf8() {
        let png = [0x89u8, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0];
        assert_eq!(detect("", "blob", Some(&png)), FileType::Image);
        assert_eq!(
            detect("", "blob", Some(b"package main\n")),
            FileType::Text
        );
        assert_eq!(
            detect("", "blob", Some(&[0xff, 0xfe, 0x00, 0x01])),
            FileType::Binary
        );
    }

    #[test]
    fn unknown_without_any_signal() {
        assert_eq!(detect("", "mystery.qqq", None), FileType::Unknown);
    }
}
