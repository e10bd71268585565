use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub enum InputFile {
    Real(PathBuf),
    Stdin(Box<[u8]>),
}

impl Default for InputFile {
    fn default() -> Self {
        Self::Stdin(Box::from([]))
    }
}

impl InputFile {
    pub fn file_name(&self) -> &str {
        match self {
            Self::Real(path) => {
                path.file_name().and_then(|name| name.to_str()).unwrap_or("<noname>")
            }
            Self::Stdin(_) => "<noname>",
        }
    }

    pub fn bytes(&self) -> Option<Cow<'_, [u8]>> {
        match self {
            Self::Real(path) => std::fs::read(path).ok().map(Cow::Owned),
            Self::Stdin(bytes) => Some(Cow::Borrowed(bytes)),
        }
    }

    /// Read the script source as text. Lexing/parsing it into a program is
    /// outside this crate's boundary; callers hand the driver an already
    /// compiled `Vec<Stmt>`, so this is provided for host programs that want
    /// to pair a parser of their own with this loader.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self.bytes()? {
            Cow::Borrowed(bytes) => Some(String::from_utf8_lossy(bytes)),
            Cow::Owned(bytes) => Some(Cow::Owned(String::from_utf8_lossy(&bytes).into_owned())),
        }
    }

    /// Get an [InputFile] representing the contents of `path`.
    ///
    /// This function returns an error if the contents are not a valid supported file type.
    #[cfg(feature = "std")]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self::Real(path.to_path_buf())
    }

    /// Get an [InputFile] representing the contents received from standard input.
    ///
    /// This function returns an error if the contents are not a valid supported file type.
    #[cfg(feature = "std")]
    pub fn from_stdin() -> Result<Self, std::io::Error> {
        use std::io::Read;

        let mut input = Vec::with_capacity(1024);
        std::io::stdin().read_to_end(&mut input)?;
        Ok(Self::Stdin(input.into_boxed_slice()))
    }
}

#[cfg(feature = "std")]
impl clap::builder::ValueParserFactory for InputFile {
    type Parser = InputFileParser;

    fn value_parser() -> Self::Parser {
        InputFileParser
    }
}

#[doc(hidden)]
#[derive(Clone)]
#[cfg(feature = "std")]
pub struct InputFileParser;

#[cfg(feature = "std")]
impl clap::builder::TypedValueParser for InputFileParser {
    type Value = InputFile;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::error::Error> {
        use clap::error::{Error, ErrorKind};

        let input_file = match value.to_str() {
            Some("-") => InputFile::from_stdin().map_err(|err| Error::raw(ErrorKind::Io, err))?,
            Some(_) | None => InputFile::from_path(PathBuf::from(value)),
        };

        match &input_file {
            InputFile::Real(path) => {
                if !path.exists() {
                    return Err(Error::raw(
                        ErrorKind::ValueValidation,
                        format!("invalid input '{}': file does not exist", path.display()),
                    ));
                }
            }
            InputFile::Stdin(_) => (),
        }

        Ok(input_file)
    }
}
