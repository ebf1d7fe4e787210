use crate::types::{
    AgentAuthentication, AgentCapabilities, AgentCard, AgentProvider, AgentSkill, AuthScheme,
};

pub struct AgentCardBuilder {
    name: String,
    description: String,
    url: String,
    version: String,
    capabilities: AgentCapabilities,
    authentication: AgentAuthentication,
    skills: Vec<AgentSkill>,
    provider: Option<AgentProvider>,
}

impl AgentCardBuilder {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            url: url.into(),
            version: version.into(),
            capabilities: AgentCapabilities::default(),
            authentication: AgentAuthentication::default(),
            skills: Vec::new(),
            provider: None,
        }
    }

    #[must_use]
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    #[must_use]
    pub fn streaming(mut self, enabled: bool) -> Self {
        self.capabilities.streaming = enabled;
        self
    }

    /// Advertise a method beyond the four built-in `tasks/*` methods.
    #[must_use]
    pub fn custom_method(mut self, method: impl Into<String>) -> Self {
        self.capabilities.custom_methods.push(method.into());
        self
    }

    #[must_use]
    pub fn api_key_auth(mut self) -> Self {
        self.authentication.scheme = AuthScheme::ApiKey;
        self.authentication.token_url = None;
        self
    }

    #[must_use]
    pub fn oauth2_auth(mut self, token_url: impl Into<String>) -> Self {
        self.authentication.scheme = AuthScheme::OAuth2;
        self.authentication.token_url = Some(token_url.into());
        self
    }

    /// Credential lookup key; defaults to the agent name.
    #[must_use]
    pub fn service_identifier(mut self, id: impl Into<String>) -> Self {
        self.authentication.service_identifier = Some(id.into());
        self
    }

    #[must_use]
    pub fn auth_required(mut self, required: bool) -> Self {
        self.authentication.required = required;
        self
    }

    #[must_use]
    pub fn skill(mut self, skill: AgentSkill) -> Self {
        self.skills.push(skill);
        self
    }

    #[must_use]
    pub fn provider(mut self, org: impl Into<String>, url: impl Into<Option<String>>) -> Self {
        self.provider = Some(AgentProvider {
            organization: org.into(),
            url: url.into(),
        });
        self
    }

    #[must_use]
    pub fn build(self) -> AgentCard {
        AgentCard {
            name: self.name,
            description: self.description,
            url: self.url,
            version: self.version,
            provider: self.provider,
            capabilities: self.capabilities,
            authentication: self.authentication,
            skills: self.skills,
        }
    }
}
