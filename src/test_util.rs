use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

#[macro_export]
macro_rules! assert_downcast_matches {
    ($e:expr_2021, $t:ty, $v:pat) => {{
        match $e.downcast_ref::<$t>() {
            Some($v) => (),
            got => panic!("Assertion failed: got wrong error variant {:?}", got),
        }
    }};
}

pub fn trace_init() {
    let color = std::io::IsTerminal::is_terminal(&std::io::stdout());
    let levels = std::env::var("TEST_LOG").unwrap_or_else(|_| "error".to_string());

    crate::trace::init(color, false, &levels);
}

pub fn random_string(len: usize) -> String {
    use rand::{Rng, distr::Alphanumeric};

    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect::<String>()
}

/// Secret data as the cluster API returns it, built from string pairs.
pub fn secret_data<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> BTreeMap<String, Vec<u8>> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value.as_bytes().to_vec()))
        .collect()
}

pub fn temp_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
