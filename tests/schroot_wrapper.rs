//! schroot-wrapper flows against scripted schroot sessions.

use maint_tools::command_runner::ScriptedRunner;
use maint_tools::schroot_wrapper::{self, WrapperOptions, DEFAULT_PROPOSED_URI};

const SESSION: &str = "jammy-0123";

fn as_root(cmd: &[&str]) -> Vec<String> {
    ["schroot", "-c", SESSION, "-d", "/", "-u", "root", "-r", "--"]
        .iter()
        .chain(cmd)
        .map(|s| s.to_string())
        .collect()
}

fn shell(directory: &str, user: &str) -> Vec<String> {
    ["schroot", "-c", SESSION, "-d", directory, "-u", user, "-r"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn options() -> WrapperOptions {
    WrapperOptions {
        chroot: "jammy".to_string(),
        directory: "/home/user/src".to_string(),
        user: "user".to_string(),
        packages: Vec::new(),
        enable_proposed: false,
        proposed_uri: DEFAULT_PROPOSED_URI.to_string(),
        proposed_components: vec!["main".to_string(), "universe".to_string()],
        ppas: Vec::new(),
    }
}

fn session_runner() -> ScriptedRunner {
    ScriptedRunner::new()
        .respond(["schroot", "-c", "jammy", "-b"], 0, &format!("{}\n", SESSION))
        .respond(["schroot", "-c", SESSION, "-e"], 0, "")
}

#[test]
fn test_install_packages_and_deb_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let deb = dir.path().join("distro-info_1.1_amd64.deb");
    std::fs::write(&deb, b"!<arch>\n").expect("write deb");
    let deb = deb.to_string_lossy().into_owned();

    let runner = session_runner()
        .respond(as_root(&["test", "-d", "/home/user/src"]), 0, "")
        .respond(as_root(&["apt-get", "update"]), 0, "")
        .respond(as_root(&["tee", "/root/distro-info_1.1_amd64.deb"]), 0, "")
        .respond(
            as_root(&[
                "apt-get",
                "install",
                "--no-install-recommends",
                "-y",
                "debconf",
                "/root/distro-info_1.1_amd64.deb",
            ]),
            0,
            "",
        )
        .respond(shell("/home/user/src", "user"), 0, "");

    let options = WrapperOptions {
        packages: vec!["debconf".to_string(), deb],
        ..options()
    };
    assert_eq!(schroot_wrapper::run(&runner, &options).expect("run"), 0);
    assert!(runner.uncalled().is_empty(), "{:?}", runner.uncalled());

    let tee = runner
        .calls()
        .into_iter()
        .find(|call| call.argv().contains(&"tee".to_string()))
        .expect("tee call");
    assert_eq!(tee.stdin(), Some(&b"!<arch>\n"[..]));
}

#[test]
fn test_fallback_to_home_directory() {
    let runner = session_runner()
        .respond(as_root(&["test", "-d", "/home/user/src"]), 1, "")
        .respond(as_root(&["sh", "-c", "realpath ~user"]), 0, "/home/user\n")
        .respond(as_root(&["test", "-d", "/home/user"]), 1, "")
        .respond(as_root(&["install", "-d", "-o", "user", "/home/user"]), 0, "")
        .respond(shell("/home/user", "user"), 37, "");

    assert_eq!(schroot_wrapper::run(&runner, &options()).expect("run"), 37);
    assert!(runner.uncalled().is_empty(), "{:?}", runner.uncalled());
}

#[test]
fn test_enable_proposed() {
    let sources = "printf 'Types: deb\nURIs: http://archive.ubuntu.com/ubuntu\n\
                   Suites: jammy-proposed\nComponents: main universe\n' \
                   > /etc/apt/sources.list.d/ubuntu-proposed.sources";
    let runner = session_runner()
        .respond(as_root(&["test", "-d", "/home/user/src"]), 0, "")
        .respond(as_root(&["sh", "-c", sources]), 0, "")
        .respond(as_root(&["apt-get", "update"]), 0, "")
        .respond(
            as_root(&["apt-get", "install", "--no-install-recommends", "-y", "hello"]),
            0,
            "",
        )
        .respond(shell("/home/user/src", "user"), 0, "");

    let options = WrapperOptions {
        enable_proposed: true,
        packages: vec!["hello".to_string()],
        ..options()
    };
    assert_eq!(schroot_wrapper::run(&runner, &options).expect("run"), 0);

    // The lists refreshed after enabling -proposed are reused for the install.
    let updates = runner
        .calls()
        .iter()
        .filter(|call| call.argv().ends_with(&["apt-get".to_string(), "update".to_string()]))
        .count();
    assert_eq!(updates, 1);
}

#[test]
fn test_add_ppa() {
    let runner = session_runner()
        .respond(as_root(&["test", "-d", "/home/user/src"]), 0, "")
        .respond(as_root(&["apt-get", "update"]), 0, "")
        .respond(
            as_root(&[
                "apt-get",
                "install",
                "--no-install-recommends",
                "-y",
                "software-properties-common",
                "gpg-agent",
            ]),
            0,
            "",
        )
        .respond(
            as_root(&["add-apt-repository", "-y", "ppa:bdrung/ppa"]),
            0,
            "",
        )
        .respond(shell("/home/user/src", "user"), 42, "");

    let options = WrapperOptions {
        ppas: vec!["bdrung/ppa".to_string()],
        ..options()
    };
    assert_eq!(schroot_wrapper::run(&runner, &options).expect("run"), 42);
    assert!(runner.uncalled().is_empty(), "{:?}", runner.uncalled());
}

#[test]
fn test_session_ends_on_failure() {
    let runner = session_runner()
        .respond(as_root(&["test", "-d", "/home/user/src"]), 0, "")
        .respond(as_root(&["apt-get", "update"]), 100, "");

    let options = WrapperOptions {
        packages: vec!["hello".to_string()],
        ..options()
    };
    assert!(schroot_wrapper::run(&runner, &options).is_err());
    let last = runner.calls().last().map(|call| call.argv()).expect("calls");
    assert_eq!(last, ["schroot", "-c", SESSION, "-e"]);
}
