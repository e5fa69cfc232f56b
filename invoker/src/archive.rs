//! Extraction of problem packages (zip) and compiler rootfs images
//! (tar.gz).

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::Context;

pub fn extract_zip(source: &Path, target: &Path) -> anyhow::Result<()> {
    let file = File::open(source)
        .with_context(|| format!("cannot open archive {}", source.display()))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("cannot read archive {}", source.display()))?;
    std::fs::create_dir_all(target)?;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        // enclosed_name rejects entries that escape the target dir.
        let path = match entry.enclosed_name() {
            Some(path) => target.join(path),
            None => anyhow::bail!("archive entry has unsafe path: {:?}", entry.name()),
        };
        if entry.is_dir() {
            std::fs::create_dir_all(&path)?;
            continue;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        std::io::copy(&mut entry, &mut file)?;
    }
    Ok(())
}

pub fn extract_tar_gz(source: &Path, target: &Path) -> anyhow::Result<()> {
    let file = File::open(source)
        .with_context(|| format!("cannot open archive {}", source.display()))?;
    let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);
    std::fs::create_dir_all(target)?;
    // Archive::unpack refuses paths that leave the target dir.
    archive
        .unpack(target)
        .with_context(|| format!("cannot extract archive {}", source.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_extract_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("problem.zip");
        {
            let file = File::create(&archive_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::FileOptions::default();
            writer.add_directory("tests/", options).unwrap();
            writer.start_file("problem.xml", options).unwrap();
            writer.write_all(b"<problem/>").unwrap();
            writer.start_file("tests/01", options).unwrap();
            writer.write_all(b"1 2\n").unwrap();
            writer.finish().unwrap();
        }
        let target = dir.path().join("problem");
        extract_zip(&archive_path, &target).unwrap();
        assert_eq!(
            std::fs::read_to_string(target.join("problem.xml")).unwrap(),
            "<problem/>"
        );
        assert_eq!(
            std::fs::read_to_string(target.join("tests/01")).unwrap(),
            "1 2\n"
        );
    }

    #[test]
    fn test_extract_tar_gz() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("rootfs.tar.gz");
        {
            let file = File::create(&archive_path).unwrap();
            let encoder =
                flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let data = b"#!/bin/sh\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, "bin/compile.sh", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
        let target = dir.path().join("rootfs");
        extract_tar_gz(&archive_path, &target).unwrap();
        assert_eq!(
            std::fs::read_to_string(target.join("bin/compile.sh")).unwrap(),
            "#!/bin/sh\n"
        );
    }
}
