// Host tests that drive the updater against a real socket and a temp directory

pub mod support;

#[cfg(test)]
mod update_flow;
