//! 解析対象の文の表現を提供するモジュール

/// 表層形と品詞のペア
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    form: String,
    pos: String,
}

impl Token {
    /// 新しいトークンを作成します
    ///
    /// # 引数
    ///
    /// * `form` - 表層形
    /// * `pos` - 品詞
    pub fn new<S, T>(form: S, pos: T) -> Self
    where
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            form: form.into(),
            pos: pos.into(),
        }
    }

    /// 表層形を返します
    #[inline(always)]
    pub fn form(&self) -> &str {
        &self.form
    }

    /// 品詞を返します
    #[inline(always)]
    pub fn pos(&self) -> &str {
        &self.pos
    }
}

/// トークン列としての文
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct Sentence {
    tokens: Vec<Token>,
}

impl Sentence {
    /// 空の文を作成します
    pub fn new() -> Self {
        Self::default()
    }

    /// 内部状態をクリアします
    #[inline(always)]
    pub fn clear(&mut self) {
        self.tokens.clear();
    }

    /// 末尾にトークンを追加します
    pub fn push(&mut self, token: Token) {
        self.tokens.push(token);
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[inline(always)]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
}

impl FromIterator<Token> for Sentence {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Token>,
    {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

impl<S, T> FromIterator<(S, T)> for Sentence
where
    S: Into<String>,
    T: Into<String>,
{
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
    {
        iter.into_iter().map(|(form, pos)| Token::new(form, pos)).collect()
    }
}
