use std::io::Read;

use anyhow::{Context, Result as AnyhowResult};
use unifs::fs::{CopyOptions, FileType, Filesystem};
use unifs::ChainOptions;

fn type_char(file_type: FileType) -> char {
    match file_type {
        FileType::Directory => 'd',
        FileType::File => 'f',
        FileType::Link => 'l',
        FileType::Other => '?',
    }
}

fn format_mtime(epoch: Option<i64>) -> String {
    match epoch {
        Some(secs) => {
            let t = std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs.max(0) as u64);
            match t.elapsed() {
                Ok(age) if age.as_secs() < 86_400 => format!("{}h ago", age.as_secs() / 3600),
                Ok(age) => format!("{}d ago", age.as_secs() / 86_400),
                Err(_) => "future".to_string(),
            }
        }
        None => "-".to_string(),
    }
}

pub async fn ls(stdout: &mut impl std::io::Write, url: &str, long: bool) -> AnyhowResult<()> {
    let (fs, path) = unifs::url_to_fs(url, &ChainOptions::new())?;
    let mut entries = fs.ls(&path).await.context("listing failed")?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    for entry in entries {
        if long {
            let size = entry
                .size
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                stdout,
                "{} {:>12} {:>8} {}",
                type_char(entry.file_type),
                size,
                format_mtime(entry.modified),
                entry.name
            )?;
        } else {
            writeln!(stdout, "{}", entry.name)?;
        }
    }
    Ok(())
}

pub async fn cat(
    stdout: &mut impl std::io::Write,
    url: &str,
    start: Option<i64>,
    end: Option<i64>,
) -> AnyhowResult<()> {
    let (fs, path) = unifs::url_to_fs(url, &ChainOptions::new())?;
    let data = fs
        .cat_file(&path, start, end)
        .await
        .with_context(|| format!("reading {url}"))?;
    stdout.write_all(&data)?;
    Ok(())
}

pub async fn pipe(url: &str) -> AnyhowResult<()> {
    let mut data = Vec::new();
    std::io::stdin().read_to_end(&mut data).context("reading stdin")?;
    let (fs, path) = unifs::url_to_fs(url, &ChainOptions::new())?;
    fs.pipe_file(&path, data.into())
        .await
        .with_context(|| format!("writing {url}"))?;
    Ok(())
}

pub async fn cp(
    src: &str,
    dst: &str,
    recursive: bool,
    max_depth: Option<usize>,
    auto_mkdir: bool,
) -> AnyhowResult<()> {
    let (src_fs, src_path) = unifs::url_to_fs(src, &ChainOptions::new())?;
    let (dst_fs, dst_path) = unifs::url_to_fs(dst, &ChainOptions::new())?;
    let opts = CopyOptions {
        recursive,
        max_depth,
        auto_mkdir: auto_mkdir.then_some(true),
        callback: None,
    };

    // Preserve the caller's trailing slashes: they carry the
    // into-this-directory meaning.
    let src_arg = keep_trailing(&src_path, src);
    let dst_arg = keep_trailing(&dst_path, dst);

    if same_instance(&src_fs, &dst_fs) {
        src_fs.copy(&src_arg, &dst_arg, &opts).await?;
        return Ok(());
    }
    // Cross-filesystem transfer bounces through the local disk.
    let staging = tempfile::tempdir().context("creating staging directory")?;
    src_fs
        .get(&src_arg, staging.path(), &opts)
        .await
        .context("downloading source")?;
    let mut staged = staging.path().display().to_string();
    staged.push('/');
    dst_fs
        .put(std::path::Path::new(&staged), &dst_arg, &opts)
        .await
        .context("uploading to destination")?;
    Ok(())
}

fn same_instance(a: &std::sync::Arc<dyn Filesystem>, b: &std::sync::Arc<dyn Filesystem>) -> bool {
    std::sync::Arc::ptr_eq(a, b)
}

fn keep_trailing(stripped: &str, original: &str) -> String {
    if original.ends_with('/') && !stripped.ends_with('/') {
        format!("{stripped}/")
    } else {
        stripped.to_string()
    }
}

pub async fn mv(src: &str, dst: &str, recursive: bool) -> AnyhowResult<()> {
    let (fs, src_path) = unifs::url_to_fs(src, &ChainOptions::new())?;
    let (_, dst_path) = unifs::url_to_fs(dst, &ChainOptions::new())?;
    let opts = CopyOptions {
        recursive,
        ..CopyOptions::default()
    };
    fs.mv(&src_path, &keep_trailing(&dst_path, dst), &opts)
        .await
        .with_context(|| format!("moving {src} to {dst}"))?;
    Ok(())
}

pub async fn rm(urls: &[String], recursive: bool, max_depth: Option<usize>) -> AnyhowResult<()> {
    for url in urls {
        let (fs, path) = unifs::url_to_fs(url, &ChainOptions::new())?;
        fs.rm(&[path.as_str()], recursive, max_depth)
            .await
            .with_context(|| format!("removing {url}"))?;
    }
    Ok(())
}

pub async fn du(
    stdout: &mut impl std::io::Write,
    url: &str,
    max_depth: Option<usize>,
) -> AnyhowResult<()> {
    let (fs, path) = unifs::url_to_fs(url, &ChainOptions::new())?;
    let total = fs.du(&path, max_depth).await?;
    writeln!(stdout, "{total}\t{url}")?;
    Ok(())
}

pub async fn glob(stdout: &mut impl std::io::Write, pattern: &str) -> AnyhowResult<()> {
    let (fs, path) = unifs::url_to_fs(pattern, &ChainOptions::new())?;
    for hit in fs.glob(&path, None).await? {
        writeln!(stdout, "{hit}")?;
    }
    Ok(())
}

pub async fn info(stdout: &mut impl std::io::Write, url: &str) -> AnyhowResult<()> {
    let (fs, path) = unifs::url_to_fs(url, &ChainOptions::new())?;
    let entry = fs.info(&path).await.with_context(|| format!("stat {url}"))?;
    writeln!(stdout, "name:     {}", entry.name)?;
    writeln!(stdout, "type:     {}", type_char(entry.file_type))?;
    if let Some(size) = entry.size {
        writeln!(stdout, "size:     {size}")?;
    }
    if let Some(modified) = entry.modified {
        writeln!(stdout, "modified: {modified}")?;
    }
    if let Some(created) = entry.created {
        writeln!(stdout, "created:  {created}")?;
    }
    if let Some(checksum) = &entry.checksum {
        writeln!(stdout, "checksum: {checksum}")?;
    }
    Ok(())
}

pub fn protocols(stdout: &mut impl std::io::Write) -> AnyhowResult<()> {
    let available = unifs::registry::available();
    for name in unifs::registry::known() {
        let marker = if available.contains(&name) { "" } else { " (alias)" };
        writeln!(stdout, "{name}{marker}")?;
    }
    Ok(())
}
