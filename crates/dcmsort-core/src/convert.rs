use crate::error::Error;
use crate::fsutil::safe_copy;
use crate::plan::ConversionItem;
use crate::scratch::SCRATCH_DIRS;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Replace existing outputs instead of skipping them.
    pub overwrite: bool,
    pub bids: bool,
    /// Sidecar fields filled in when the converter left them unset.
    pub default_fields: BTreeMap<String, String>,
}

/// External image-format converter.
pub trait Converter: Send + Sync {
    fn name(&self) -> &str;

    /// False for converters that only record the plan.
    fn enabled(&self) -> bool {
        true
    }

    /// Produce the outputs of one item and return the files written.
    fn convert(&self, item: &ConversionItem, options: &ConvertOptions) -> Result<Vec<PathBuf>, Error>;
}

/// Plans are produced but nothing is converted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConverter;

impl Converter for NoopConverter {
    fn name(&self) -> &str {
        "none"
    }

    fn enabled(&self) -> bool {
        false
    }

    fn convert(&self, _item: &ConversionItem, _options: &ConvertOptions) -> Result<Vec<PathBuf>, Error> {
        Ok(Vec::new())
    }
}

/// Runs the `dcm2niix` executable.
///
/// Item files may be metadata sidecars named `<image>.json`; when `<image>`
/// exists next to the sidecar it is passed to the converter instead.
#[derive(Debug, Clone)]
pub struct Dcm2niixConverter {
    program: PathBuf,
}

impl Default for Dcm2niixConverter {
    fn default() -> Self {
        Self {
            program: PathBuf::from("dcm2niix"),
        }
    }
}

impl Dcm2niixConverter {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn convert_nifti(
        &self,
        item: &ConversionItem,
        outtype: &str,
        options: &ConvertOptions,
    ) -> Result<Vec<PathBuf>, Error> {
        let outname = with_suffix(&item.prefix, &format!(".{}", outtype));
        if outname.exists() && !options.overwrite {
            info!("{} already exists, skipping", outname.display());
            return Ok(Vec::new());
        }

        let scratch = SCRATCH_DIRS.create("dcmsortconv")?;
        let result = self.run_in(&scratch, item, outtype, options);
        SCRATCH_DIRS.remove(&scratch)?;
        result
    }

    fn run_in(
        &self,
        scratch: &Path,
        item: &ConversionItem,
        outtype: &str,
        options: &ConvertOptions,
    ) -> Result<Vec<PathBuf>, Error> {
        let input_dir = scratch.join("in");
        let output_dir = scratch.join("out");
        fs::create_dir_all(&input_dir)?;
        fs::create_dir_all(&output_dir)?;
        link_sources(&item.files, &input_dir)?;

        let basename = item
            .prefix
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "converted".to_string());
        let output = Command::new(&self.program)
            .arg("-b")
            .arg("y")
            .arg("-z")
            .arg(if outtype == "nii.gz" { "y" } else { "n" })
            .arg("-f")
            .arg(&basename)
            .arg("-o")
            .arg(&output_dir)
            .arg(&input_dir)
            .output()
            .map_err(|e| Error::Converter(format!("cannot run {}: {}", self.program.display(), e)))?;
        if !output.status.success() {
            return Err(Error::Converter(format!(
                "{} failed for {}: {}",
                self.program.display(),
                item.prefix.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let ext = format!(".{}", outtype);
        let mut images: Vec<PathBuf> = fs::read_dir(&output_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.to_string_lossy().ends_with(&ext))
            .collect();
        images.sort();
        if images.is_empty() {
            return Err(Error::Converter(format!(
                "{} produced no {} output for {}",
                self.program.display(),
                outtype,
                item.prefix.display()
            )));
        }

        let suffixes: Vec<String> = if images.len() == 1 {
            vec![String::new()]
        } else {
            warn!(
                "Series {} produced {} volumes, numbering them",
                item.series_id,
                images.len()
            );
            (1..=images.len()).map(|i| format!("-{}", i)).collect()
        };

        let mut written = Vec::new();
        for (image, suffix) in images.iter().zip(suffixes) {
            let stem = image.to_string_lossy();
            let stem = &stem[..stem.len() - ext.len()];
            let target = with_suffix(&item.prefix, &suffix);
            written.push(safe_copy(image, &with_suffix(&target, &ext), options.overwrite)?);
            for side in [".json", ".bval", ".bvec"] {
                let produced = PathBuf::from(format!("{}{}", stem, side));
                if produced.exists() {
                    let dest = safe_copy(&produced, &with_suffix(&target, side), options.overwrite)?;
                    if side == ".json" {
                        merge_default_fields(&dest, &options.default_fields)?;
                    }
                    written.push(dest);
                }
            }
        }
        Ok(written)
    }
}

impl Converter for Dcm2niixConverter {
    fn name(&self) -> &str {
        "dcm2niix"
    }

    fn convert(&self, item: &ConversionItem, options: &ConvertOptions) -> Result<Vec<PathBuf>, Error> {
        info!(
            "Converting {} ({} files) with {}, output types {:?}",
            item.prefix.display(),
            item.files.len(),
            self.name(),
            item.outtypes
        );
        if let Some(parent) = item.prefix.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut written = Vec::new();
        for outtype in &item.outtypes {
            match outtype.as_str() {
                "dicom" => written.push(link_dicoms(item)?),
                "nii" | "nii.gz" => written.extend(self.convert_nifti(item, outtype, options)?),
                other => warn!("Unsupported output type '{}' for {}", other, item.prefix.display()),
            }
        }
        Ok(written)
    }
}

/// Build a converter from its configured name.
pub fn converter_by_name(name: &str) -> Result<Box<dyn Converter>, Error> {
    match name {
        "none" => Ok(Box::new(NoopConverter)),
        "dcm2niix" => Ok(Box::new(Dcm2niixConverter::default())),
        other => Err(Error::Config(config::ConfigError::Message(format!(
            "unknown converter '{}', expected 'dcm2niix' or 'none'",
            other
        )))),
    }
}

/// Map a subject id through an external command printing the anonymized id.
pub fn anonymize_subject(subject: &str, anon_cmd: Option<&str>) -> Result<String, Error> {
    let Some(cmd) = anon_cmd else {
        return Ok(subject.to_string());
    };
    let output = Command::new(cmd)
        .arg(subject)
        .output()
        .map_err(|e| Error::Other(format!("cannot run anonymization command {}: {}", cmd, e)))?;
    if !output.status.success() {
        return Err(Error::Other(format!(
            "anonymization command {} failed for {}",
            cmd, subject
        )));
    }
    let anon = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if anon.is_empty() {
        return Err(Error::Other(format!(
            "anonymization command {} returned nothing for {}",
            cmd, subject
        )));
    }
    info!("Anonymized subject {} into {}", subject, anon);
    Ok(anon)
}

/// Strip non-alphanumeric characters, as BIDS subject labels require.
pub fn clean_bids_subject(subject: &str) -> String {
    let cleaned: String = subject.chars().filter(|c| c.is_alphanumeric()).collect();
    if cleaned != subject {
        warn!(
            "{} contained nonalphanumeric character(s), subject ID was cleaned to be {}",
            subject, cleaned
        );
    }
    cleaned
}

/// `<prefix>_dicom/` with a link to every source file.
fn link_dicoms(item: &ConversionItem) -> Result<PathBuf, Error> {
    let dicom_dir = with_suffix(&item.prefix, "_dicom");
    if dicom_dir.exists() {
        fs::remove_dir_all(&dicom_dir)?;
    }
    fs::create_dir_all(&dicom_dir)?;
    link_sources(&item.files, &dicom_dir)?;
    debug!("Linked {} files into {}", item.files.len(), dicom_dir.display());
    Ok(dicom_dir)
}

/// Link every source image into `dir`. Sources from different directories
/// may share a file name (`IM0001`); later ones get an index prefix.
fn link_sources(files: &[PathBuf], dir: &Path) -> Result<(), Error> {
    for (index, file) in files.iter().enumerate() {
        let source = image_source(file);
        let Some(name) = source.file_name() else {
            continue;
        };
        let mut dest = dir.join(name);
        if dest.symlink_metadata().is_ok() {
            dest = dir.join(format!("{:05}-{}", index, name.to_string_lossy()));
        }
        link_file(&source, &dest)?;
    }
    Ok(())
}

fn merge_default_fields(sidecar: &Path, defaults: &BTreeMap<String, String>) -> Result<(), Error> {
    if defaults.is_empty() {
        return Ok(());
    }
    let text = fs::read_to_string(sidecar)?;
    let mut fields: Map<String, Value> = serde_json::from_str(&text)?;
    for (k, v) in defaults {
        fields
            .entry(k.clone())
            .or_insert_with(|| Value::String(v.clone()));
    }
    fs::write(sidecar, serde_json::to_string_pretty(&fields)?)?;
    Ok(())
}

/// The image a metadata sidecar describes, or the file itself.
fn image_source(file: &Path) -> PathBuf {
    if file.extension().map_or(false, |e| e == "json") {
        let image = file.with_extension("");
        if image.is_file() {
            return image;
        }
    }
    file.to_path_buf()
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn absolute(path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(unix)]
fn link_file(src: &Path, dest: &Path) -> Result<(), Error> {
    std::os::unix::fs::symlink(absolute(src)?, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn link_file(src: &Path, dest: &Path) -> Result<(), Error> {
    fs::copy(absolute(src)?, dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_bids_subject() {
        assert_eq!(clean_bids_subject("sub_01-a"), "sub01a");
        assert_eq!(clean_bids_subject("s01"), "s01");
    }

    #[test]
    fn test_anonymize_without_command_is_identity() {
        assert_eq!(anonymize_subject("s01", None).unwrap(), "s01");
    }

    #[cfg(unix)]
    #[test]
    fn test_anonymize_uses_command_output() {
        // `echo` prints its argument, which stands in for a lookup table
        assert_eq!(anonymize_subject("s01", Some("echo")).unwrap(), "s01");
    }

    #[test]
    fn test_noop_converter_writes_nothing() {
        let item = ConversionItem {
            prefix: PathBuf::from("/nonexistent/run001"),
            outtypes: vec!["nii.gz".to_string()],
            files: vec![PathBuf::from("/raw/a.json")],
            series_id: "1-a".to_string(),
        };
        let conv = NoopConverter;
        assert!(!conv.enabled());
        assert!(conv.convert(&item, &ConvertOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_dicom_outtype_links_sources() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        fs::create_dir(&raw).unwrap();
        fs::write(raw.join("im1.dcm"), "x").unwrap();
        fs::write(raw.join("im1.dcm.json"), "{}").unwrap();
        fs::write(raw.join("im2.json"), "{}").unwrap();

        let item = ConversionItem {
            prefix: dir.path().join("out/run001"),
            outtypes: vec!["dicom".to_string()],
            files: vec![raw.join("im1.dcm.json"), raw.join("im2.json")],
            series_id: "1-a".to_string(),
        };
        let written = Dcm2niixConverter::default()
            .convert(&item, &ConvertOptions::default())
            .unwrap();
        let dicom_dir = dir.path().join("out/run001_dicom");
        assert_eq!(written, vec![dicom_dir.clone()]);
        assert!(dicom_dir.join("im1.dcm").exists());
        assert!(dicom_dir.join("im2.json").exists());
    }

    #[test]
    fn test_same_named_sources_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = Vec::new();
        for series in ["s1", "s2"] {
            let raw = dir.path().join(series);
            fs::create_dir(&raw).unwrap();
            fs::write(raw.join("IM0001"), series).unwrap();
            files.push(raw.join("IM0001"));
        }

        let item = ConversionItem {
            prefix: dir.path().join("out/run001"),
            outtypes: vec!["dicom".to_string()],
            files,
            series_id: "1-a".to_string(),
        };
        Dcm2niixConverter::default()
            .convert(&item, &ConvertOptions::default())
            .unwrap();
        let dicom_dir = dir.path().join("out/run001_dicom");
        assert_eq!(fs::read_to_string(dicom_dir.join("IM0001")).unwrap(), "s1");
        assert_eq!(fs::read_to_string(dicom_dir.join("00001-IM0001")).unwrap(), "s2");
    }

    #[test]
    fn test_default_fields_fill_missing_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("run001.json");
        fs::write(&sidecar, r#"{"Manufacturer": "Siemens"}"#).unwrap();
        let mut defaults = BTreeMap::new();
        defaults.insert("Manufacturer".to_string(), "Other".to_string());
        defaults.insert("Acknowledgements".to_string(), "Thanks".to_string());

        merge_default_fields(&sidecar, &defaults).unwrap();
        let fields: Map<String, Value> =
            serde_json::from_str(&fs::read_to_string(&sidecar).unwrap()).unwrap();
        assert_eq!(fields["Manufacturer"], "Siemens");
        assert_eq!(fields["Acknowledgements"], "Thanks");
    }

    #[test]
    fn test_unknown_converter_name() {
        assert!(converter_by_name("dcm2nii").is_err());
        assert_eq!(converter_by_name("none").unwrap().name(), "none");
    }
}
