use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Reads a corpus file: one story per line.
///
/// - Reads the entire file into memory
/// - Trims every line and drops the empty ones
pub fn read_corpus<P: AsRef<Path>>(filename: P) -> io::Result<Vec<String>> {
	let contents = fs::read_to_string(filename)?;
	Ok(contents
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(str::to_owned)
		.collect())
}

/// Builds an output path based on an input path and a new extension.
///
/// Example:
/// `models/kn.json` + `"bin"` → `models/kn.bin`
pub fn build_output_path<P: AsRef<Path>>(input_path: P, output_extension: &str) -> io::Result<PathBuf> {
	let input_path = input_path.as_ref();

	let parent = input_path.parent().unwrap_or_else(|| Path::new("."));
	let file_stem = input_path
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Input path has no filename"))?;

	let mut output = PathBuf::from(parent);
	output.push(file_stem);
	output.set_extension(output_extension);

	Ok(output)
}

/// Extracts the base filename without extension, used as a model name.
///
/// Examples:
/// - `"./models/kneser_ney_4gram.json"` → `"kneser_ney_4gram"`
/// - `"story.bin"` → `"story"`
pub fn get_filename<P: AsRef<Path>>(input_path: P) -> io::Result<String> {
	let stem = input_path
		.as_ref()
		.file_stem()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Path has no filename"))?;

	Ok(stem.to_string_lossy().to_string())
}

/// Lists the names (without extension) of all files with a given extension
/// in a directory, sorted.
pub fn list_files<P: AsRef<Path>>(dir: P, extension: &str) -> io::Result<Vec<String>> {
	let mut files = Vec::new();

	for entry in fs::read_dir(dir)? {
		let path = entry?.path();
		if path.is_file() && path.extension().is_some_and(|e| e == extension) {
			files.push(get_filename(&path)?);
		}
	}
	files.sort();

	Ok(files)
}

/// Creates the parent directory of `path` if it does not exist yet.
pub fn ensure_parent<P: AsRef<Path>>(path: P) -> io::Result<()> {
	match path.as_ref().parent() {
		Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
		_ => Ok(()),
	}
}
