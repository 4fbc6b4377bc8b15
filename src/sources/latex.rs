//! LaTeX source archive: download, unpack, pick the main file, convert.

use super::SourceContext;
use crate::config::ArxivEndpoints;
use crate::error::Arxiv2MdError;
use crate::identifier::strip_version;
use crate::metadata::ArxivMetadata;
use crate::net::fallback::{first_success, FallbackError, Outcome, Strategy};
use crate::output::MarkdownConversionResult;
use crate::pipeline::latex::{convert_latex, select_main_tex, TexFile};
use crate::progress::Stage;
use flate2::read::GzDecoder;
use std::io::Read;
use tracing::{debug, info};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Archive URLs in the order they are tried, without duplicates.
pub fn archive_candidates(endpoints: &ArxivEndpoints, metadata: &ArxivMetadata) -> Vec<String> {
    let src = endpoints.src_base.trim_end_matches('/');
    let eprint = endpoints.eprint_base.trim_end_matches('/');
    let mut candidates = Vec::with_capacity(3);
    for url in [
        format!("{src}/{}", strip_version(&metadata.canonical_id)),
        format!("{src}/{}", metadata.versioned_id),
        format!("{eprint}/{}", metadata.versioned_id),
    ] {
        if !candidates.contains(&url) {
            candidates.push(url);
        }
    }
    candidates
}

/// Download the source archive and convert its main `.tex` file.
pub async fn fetch_latex_markdown(
    ctx: &SourceContext<'_>,
) -> Result<Option<MarkdownConversionResult>, Arxiv2MdError> {
    ctx.stage(Stage::LatexFallback);
    let candidates = archive_candidates(&ctx.config.endpoints, ctx.metadata);

    let strategies = candidates
        .iter()
        .map(|url| {
            Strategy::new(url.as_str(), async move {
                Outcome::from(ctx.net.fetch_direct(url).await.map(Some))
            })
        })
        .collect();

    let bytes = match first_success(strategies).await {
        Ok((url, bytes)) => {
            info!("Downloaded source archive {} ({} bytes)", url, bytes.len());
            bytes
        }
        Err(FallbackError::Fatal(e)) => return Err(e),
        Err(FallbackError::Exhausted(ex)) => {
            return Err(Arxiv2MdError::Archive(format!(
                "no source archive could be downloaded ({})",
                ex.summary()
            )))
        }
    };

    let files = unpack_tex_files(&bytes)?;
    let Some(main) = select_main_tex(&files) else {
        return Err(Arxiv2MdError::Archive("archive contains no .tex file".into()));
    };
    debug!("Main LaTeX file: {} (of {})", main.name, files.len());

    Ok(convert_latex(
        &main.content,
        ctx.metadata,
        &ctx.config.labels,
        ctx.config.omit_references,
    ))
}

/// Every non-empty `.tex` file in a source payload.
///
/// arXiv serves a gzip'd tarball for multi-file submissions and a gzip'd
/// bare `.tex` for single-file ones; an uncompressed tarball is also read.
pub fn unpack_tex_files(bytes: &[u8]) -> Result<Vec<TexFile>, Arxiv2MdError> {
    let data = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(bytes)
            .read_to_end(&mut out)
            .map_err(|e| Arxiv2MdError::Archive(format!("gzip: {e}")))?;
        out
    } else {
        bytes.to_vec()
    };

    if is_tar(&data) {
        return read_tar(&data);
    }

    let text = String::from_utf8_lossy(&data);
    if text.contains("\\begin{document}") || text.contains("\\section") {
        debug!("Source payload is a single .tex file");
        return Ok(vec![TexFile {
            name: "main.tex".into(),
            content: text.into_owned(),
        }]);
    }
    Err(Arxiv2MdError::Archive(
        "payload is neither a tar archive nor a LaTeX file".into(),
    ))
}

/// POSIX and GNU headers both carry `ustar` at offset 257.
fn is_tar(data: &[u8]) -> bool {
    data.get(257..262) == Some(b"ustar".as_slice())
}

fn read_tar(data: &[u8]) -> Result<Vec<TexFile>, Arxiv2MdError> {
    let archive_err = |e: std::io::Error| Arxiv2MdError::Archive(format!("tar: {e}"));
    let mut archive = tar::Archive::new(data);
    let mut files = Vec::new();

    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path().map_err(archive_err)?.to_string_lossy().into_owned();
        if !name.to_ascii_lowercase().ends_with(".tex") {
            continue;
        }
        let mut raw = Vec::new();
        entry.read_to_end(&mut raw).map_err(archive_err)?;
        let content = String::from_utf8_lossy(&raw).into_owned();
        if content.trim().is_empty() {
            continue;
        }
        files.push(TexFile { name, content });
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, content.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn metadata(canonical: &str, versioned: &str) -> ArxivMetadata {
        ArxivMetadata {
            title: "T".into(),
            pdf_url: String::new(),
            canonical_id: canonical.into(),
            versioned_id: versioned.into(),
            authors: vec![],
            summary: None,
        }
    }

    #[test]
    fn candidates_in_order() {
        let endpoints = ArxivEndpoints::default();
        let urls = archive_candidates(&endpoints, &metadata("2301.12345v2", "2301.12345v2"));
        assert_eq!(
            urls,
            vec![
                "https://arxiv.org/src/2301.12345",
                "https://arxiv.org/src/2301.12345v2",
                "https://arxiv.org/e-print/2301.12345v2",
            ]
        );
    }

    #[test]
    fn candidates_are_deduplicated() {
        let endpoints = ArxivEndpoints::default();
        let urls = archive_candidates(&endpoints, &metadata("2301.12345", "2301.12345"));
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn gzipped_tarball() {
        let tar = tarball(&[
            ("main.tex", "\\begin{document}\nHi\n\\end{document}"),
            ("fig.png", "binary"),
            ("sec/intro.tex", "\\section{Intro}"),
            ("empty.tex", "   "),
        ]);
        let files = unpack_tex_files(&gzip(&tar)).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["main.tex", "sec/intro.tex"]);
    }

    #[test]
    fn plain_tarball() {
        let tar = tarball(&[("paper.TEX", "\\section{A}")]);
        let files = unpack_tex_files(&tar).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].content, "\\section{A}");
    }

    #[test]
    fn gzipped_single_file() {
        let files = unpack_tex_files(&gzip(b"\\documentclass{article}\n\\begin{document}x\\end{document}")).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "main.tex");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            unpack_tex_files(&gzip(b"%PDF-1.5 not latex")),
            Err(Arxiv2MdError::Archive(_))
        ));
        assert!(matches!(
            unpack_tex_files(&[0x1f, 0x8b, 0x00]),
            Err(Arxiv2MdError::Archive(_))
        ));
    }
}
