//! Deployment command sequence builder

use std::collections::BTreeMap;

use crate::storage::settings::{FrameworkDescriptor, Language};

/// Shell loop waiting for the dpkg/apt locks to be released.
///
/// Fresh guests often run unattended-upgrades on first boot; racing it
/// makes apt-get fail outright.
const WAIT_FOR_LOCK: &str = "while fuser /var/lib/dpkg/lock >/dev/null 2>&1 || fuser /var/lib/apt/lists/lock >/dev/null 2>&1 || fuser /var/lib/dpkg/lock-frontend >/dev/null 2>&1; do echo 'Waiting for apt lock...'; sleep 2; done";

/// Recipes this builder knows how to launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkKind {
    React,
    Vuejs,
    Nextjs,
    Express,
    Django,
    Flask,
    Fastapi,
    Laravel,
    /// Unknown id: best-effort pm2 start of whatever `npm start` does
    Generic,
}

impl FrameworkKind {
    pub fn from_id(id: &str) -> Self {
        match id {
            "react" => FrameworkKind::React,
            "vuejs" => FrameworkKind::Vuejs,
            "nextjs" => FrameworkKind::Nextjs,
            "express" => FrameworkKind::Express,
            "django" => FrameworkKind::Django,
            "flask" => FrameworkKind::Flask,
            "fastapi" => FrameworkKind::Fastapi,
            "laravel" => FrameworkKind::Laravel,
            _ => FrameworkKind::Generic,
        }
    }
}

/// Build the full command sequence that takes a bare guest to a running
/// application. Pure; no I/O happens here.
pub fn build_commands(
    framework_id: &str,
    descriptor: &FrameworkDescriptor,
    repo_url: &str,
    env_vars: Option<&BTreeMap<String, String>>,
) -> Vec<String> {
    let port = descriptor.port;
    let mut commands = Vec::new();

    // Base toolchain
    commands.push(format!(
        "export DEBIAN_FRONTEND=noninteractive && {lock} && apt-get update -y && {lock} && apt-get install -y apt-utils git curl wget build-essential",
        lock = WAIT_FOR_LOCK
    ));

    // Language runtime
    match descriptor.language {
        Language::Nodejs => commands.push(format!(
            "export DEBIAN_FRONTEND=noninteractive && {lock} && curl -fsSL https://deb.nodesource.com/setup_18.x | bash - && {lock} && apt-get install -y nodejs && npm install -g pm2 serve",
            lock = WAIT_FOR_LOCK
        )),
        Language::Python => commands.push(format!(
            "export DEBIAN_FRONTEND=noninteractive && {lock} && apt-get install -y python3 python3-pip python3-venv",
            lock = WAIT_FOR_LOCK
        )),
        Language::Php => commands.push(format!(
            "export DEBIAN_FRONTEND=noninteractive && {lock} && apt-get install -y php php-cli php-fpm php-mysql php-xml php-mbstring composer",
            lock = WAIT_FOR_LOCK
        )),
    }

    // Fresh checkout
    commands.push("rm -rf /opt/app && mkdir -p /opt/app".to_string());
    commands.push(format!("git clone --depth 1 {} /opt/app", repo_url));

    // Normalize CRLF line endings from repos authored on Windows
    commands.push(
        "apt-get install -y dos2unix && find /opt/app -type f \\( -name \"*.js\" -o -name \"*.py\" -o -name \"*.sh\" -o -name \"*.json\" -o -name \"*.txt\" -o -name \"*.md\" -o -name \"*.html\" -o -name \"*.css\" -o -name \"*.yml\" -o -name \"*.yaml\" -o -name \"*.env*\" -o -name \"Dockerfile*\" -o -name \"*.ts\" -o -name \"*.tsx\" -o -name \"*.jsx\" \\) -exec dos2unix {} \\; 2>/dev/null || true"
            .to_string(),
    );

    if let Some(env_vars) = env_vars {
        if !env_vars.is_empty() {
            let env_content = env_vars
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("\\n");
            commands.push(format!("echo -e \"{}\" > /opt/app/.env", env_content));
        }
    }

    // Build and launch
    let launch = match FrameworkKind::from_id(framework_id) {
        FrameworkKind::React => format!(
            "cd /opt/app && export NODE_OPTIONS=--openssl-legacy-provider && npm install --legacy-peer-deps 2>&1 | tail -20 && (npm run build 2>&1 | tail -30 || true) && pm2 delete react-app 2>/dev/null || true && BUILD_DIR=$(if [ -d 'dist' ]; then echo 'dist'; elif [ -d 'build' ]; then echo 'build'; else echo '.'; fi) && pm2 serve $BUILD_DIR {port} --name react-app --spa && pm2 save && pm2 startup systemd -u root --hp /root 2>/dev/null || true"
        ),
        FrameworkKind::Vuejs => format!(
            "cd /opt/app && export NODE_OPTIONS=--openssl-legacy-provider && npm install --legacy-peer-deps 2>&1 | tail -20 && npm run build 2>&1 | tail -20 && pm2 delete vue-app 2>/dev/null || true && pm2 serve dist {port} --name vue-app --spa && pm2 save && pm2 startup systemd -u root --hp /root 2>/dev/null || true"
        ),
        FrameworkKind::Nextjs => "cd /opt/app && export NODE_OPTIONS=--openssl-legacy-provider && npm install --legacy-peer-deps 2>&1 | tail -20 && npm run build 2>&1 | tail -20 && pm2 delete nextjs-app 2>/dev/null || true && pm2 start npm --name nextjs-app -- start && pm2 save && pm2 startup systemd -u root --hp /root 2>/dev/null || true".to_string(),
        FrameworkKind::Express => "cd /opt/app && npm install 2>&1 | tail -20 && pm2 delete express-app 2>/dev/null || true && pm2 start npm --name express-app -- start && pm2 save && pm2 startup systemd -u root --hp /root 2>/dev/null || true".to_string(),
        FrameworkKind::Django => format!(
            "cd /opt/app && python3 -m venv venv && source venv/bin/activate && pip install --upgrade pip && pip install -r requirements.txt gunicorn 2>&1 | tail -20 && python manage.py migrate --noinput 2>&1 || true && python manage.py collectstatic --noinput 2>&1 || true && nohup venv/bin/gunicorn --bind 0.0.0.0:{port} --workers 2 --daemon --access-logfile /var/log/app-access.log --error-logfile /var/log/app-error.log $(find . -name 'wsgi.py' | head -1 | sed 's|./||;s|/|.|g;s|.py||'):application"
        ),
        FrameworkKind::Flask => format!(
            "cd /opt/app && python3 -m venv venv && source venv/bin/activate && pip install --upgrade pip && pip install -r requirements.txt gunicorn 2>&1 | tail -20 && nohup venv/bin/gunicorn --bind 0.0.0.0:{port} --workers 2 --daemon --access-logfile /var/log/app-access.log --error-logfile /var/log/app-error.log app:app"
        ),
        FrameworkKind::Fastapi => format!(
            "cd /opt/app && python3 -m venv venv && source venv/bin/activate && pip install --upgrade pip && pip install -r requirements.txt uvicorn 2>&1 | tail -20 && nohup venv/bin/uvicorn main:app --host 0.0.0.0 --port {port} > /var/log/app.log 2>&1 &"
        ),
        FrameworkKind::Laravel => format!(
            "cd /opt/app && composer install --no-dev --optimize-autoloader 2>&1 | tail -20 && cp .env.example .env 2>/dev/null || true && php artisan key:generate 2>&1 || true && php artisan migrate --force 2>&1 || true && nohup php artisan serve --host=0.0.0.0 --port={port} > /var/log/app.log 2>&1 &"
        ),
        FrameworkKind::Generic => "cd /opt/app && npm install 2>&1 | tail -20 && pm2 delete app 2>/dev/null || true && pm2 start npm --name app -- start && pm2 save".to_string(),
    };
    commands.push(launch);

    // Best-effort status probe
    commands.push(
        "sleep 3 && (pm2 list 2>/dev/null || ps aux | grep -E 'gunicorn|uvicorn|node|php' | grep -v grep | head -5)"
            .to_string(),
    );

    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::settings::default_frameworks;

    const REPO: &str = "https://github.com/acme/demo.git";

    #[test]
    fn django_sequence_installs_python_and_runs_gunicorn() {
        let frameworks = default_frameworks();
        let commands = build_commands("django", &frameworks["django"], REPO, None);

        // bootstrap, runtime, wipe, clone, dos2unix, launch, probe
        assert_eq!(commands.len(), 7);
        assert!(commands[0].contains("DEBIAN_FRONTEND=noninteractive"));
        assert!(commands[0].contains("Waiting for apt lock"));
        assert!(commands[1].contains("python3-venv"));
        assert_eq!(commands[2], "rm -rf /opt/app && mkdir -p /opt/app");
        assert_eq!(commands[3], format!("git clone --depth 1 {} /opt/app", REPO));
        assert!(commands[4].contains("dos2unix"));
        assert!(commands[5].contains("gunicorn --bind 0.0.0.0:8000"));
        assert!(commands[5].contains("manage.py migrate"));
        assert!(commands[6].contains("pm2 list"));
    }

    #[test]
    fn flask_env_vars_become_an_env_file() {
        let frameworks = default_frameworks();
        let mut env = BTreeMap::new();
        env.insert("APP_SECRET".to_string(), "s3cret".to_string());
        env.insert("DEBUG".to_string(), "false".to_string());

        let commands = build_commands("flask", &frameworks["flask"], REPO, Some(&env));

        assert_eq!(commands.len(), 8);
        let env_cmd = &commands[5];
        assert!(env_cmd.starts_with("echo -e"));
        assert!(env_cmd.contains("APP_SECRET=s3cret\\nDEBUG=false"));
        assert!(env_cmd.ends_with("> /opt/app/.env"));
        assert!(commands[6].contains("gunicorn --bind 0.0.0.0:5000"));
        assert!(commands[6].contains("app:app"));
    }

    #[test]
    fn react_probes_both_build_output_dirs() {
        let frameworks = default_frameworks();
        let commands = build_commands("react", &frameworks["react"], REPO, None);

        let launch = &commands[5];
        assert!(launch.contains("[ -d 'dist' ]"));
        assert!(launch.contains("[ -d 'build' ]"));
        assert!(launch.contains("pm2 serve $BUILD_DIR 3000"));
        assert!(launch.contains("pm2 save"));
    }

    #[test]
    fn unknown_framework_falls_back_to_generic_recipe() {
        assert_eq!(FrameworkKind::from_id("svelte"), FrameworkKind::Generic);

        let descriptor = FrameworkDescriptor {
            name: "Svelte".to_string(),
            language: Language::Nodejs,
            version: "4.x".to_string(),
            port: 3000,
            install_cmd: String::new(),
        };
        let commands = build_commands("svelte", &descriptor, REPO, None);

        let launch = &commands[5];
        assert!(launch.contains("pm2 start npm --name app -- start"));
    }
}
