use secrecy::SecretString;

#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub frontend_url: String,
    pub cron_secret: SecretString,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(frontend_url: String) -> Self {
        Self {
            frontend_url,
            cron_secret: SecretString::default(),
        }
    }

    pub fn set_cron_secret(&mut self, secret: SecretString) {
        self.cron_secret = secret;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let url = "https://portal.schulamt.de".to_string();
        let args = GlobalArgs::new(url);
        assert_eq!(args.frontend_url, "https://portal.schulamt.de");
        assert_eq!(args.cron_secret.expose_secret(), "");
    }

    #[test]
    fn test_set_cron_secret() {
        let mut args = GlobalArgs::new("http://localhost:3000".to_string());
        args.set_cron_secret(SecretString::from("s3cret".to_string()));
        assert_eq!(args.cron_secret.expose_secret(), "s3cret");
    }
}
