use rkv_common::encode_command;

/// One store command as a list of binary-safe arguments.
///
/// Remembers where its first key sits so the cluster transport can route it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Vec<u8>>,
    first_key: Option<usize>,
}

impl Command {
    pub fn new(name: &str) -> Self {
        Command {
            args: vec![name.as_bytes().to_vec()],
            first_key: None,
        }
    }

    /// Appends a key argument.
    pub fn key(mut self, key: impl AsRef<[u8]>) -> Self {
        if self.first_key.is_none() {
            self.first_key = Some(self.args.len());
        }
        self.args.push(key.as_ref().to_vec());
        self
    }

    /// Appends a non-key argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_ascii_uppercase()
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.args
    }

    pub fn first_key(&self) -> Option<&[u8]> {
        self.first_key.map(|idx| self.args[idx].as_slice())
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        encode_command(&self.args, out);
    }
}
