use std::fs;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Writes a shell script that speaks the helper line protocol well
/// enough for the upload flow: every request is acknowledged, the
/// `controller_name` request reports a fixed name, and `save_as`
/// creates the requested file.
///
/// The same script serves both helper roles. The one-shot upload child
/// only ever sends a single request before it is shut down, and the
/// session child walks the fixed open / controller_name / save_as /
/// close sequence.
pub fn upload_helper_script(dir: &Path) -> PathBuf {
    let script = dir.join("helper-upload.sh");
    fs::write(
        &script,
        concat!(
            "#!/bin/sh\n",
            "read -r line; echo '{\"status\":\"ok\"}'\n",
            "read -r line; echo '{\"status\":\"name\",\"name\":\"TESTPLC\"}'\n",
            "read -r line\n",
            "path=$(printf '%s' \"$line\" | sed 's/.*\"path\":\"\\([^\"]*\\)\".*/\\1/')\n",
            ": > \"$path\"; echo '{\"status\":\"ok\"}'\n",
            "read -r line; echo '{\"status\":\"ok\"}'\n",
        ),
    )
    .unwrap();
    mark_executable(&script);
    script
}

/// Writes a shell script that plays a controller session for the watch
/// flow: the offline read reports 3, the first two online reads hold at
/// 3, and every read after that reports 5.
pub fn watch_helper_script(dir: &Path) -> PathBuf {
    let script = dir.join("helper-watch.sh");
    fs::write(
        &script,
        concat!(
            "#!/bin/sh\n",
            "n=0\n",
            "while read -r line; do\n",
            "  case \"$line\" in\n",
            "    *'\"op\":\"close\"'*) echo '{\"status\":\"ok\"}'; exit 0 ;;\n",
            "    *'\"mode\":\"offline\"'*) echo '{\"status\":\"value\",\"value\":3}' ;;\n",
            "    *'\"op\":\"read_tag\"'*)\n",
            "      n=$((n+1))\n",
            "      if [ \"$n\" -le 2 ]; then\n",
            "        echo '{\"status\":\"value\",\"value\":3}'\n",
            "      else\n",
            "        echo '{\"status\":\"value\",\"value\":5}'\n",
            "      fi ;;\n",
            "    *) echo '{\"status\":\"ok\"}' ;;\n",
            "  esac\n",
            "done\n",
        ),
    )
    .unwrap();
    mark_executable(&script);
    script
}

#[cfg(unix)]
fn mark_executable(path: &Path) {
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).unwrap();
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) {}

pub fn sh_command(script: &Path) -> Vec<String> {
    vec!["sh".to_string(), script.display().to_string()]
}
